//! Capture files digested from disk.

use gpsfake_common::error::HarnessError;
use gpsfake_nmea::capture::{LogDigester, LogRecord, Parity, TransportHint};
use std::io::Write;

fn capture_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_digest_nmea_capture() {
    let file = capture_file(concat!(
        "# Name: Garmin eTrex\n",
        "# Serial: 4800 8O1\n",
        "$GPRMC,073123.000,A,5742.434,N,1141.713,E,1.00,0.00,280511,,,S*41\r\n",
        "# %Delay: 1\n",
        "$GPRMC,073124.000,A,5742.434,N,1141.713,E,1.00,0.00,280511,,,S*46\r\n",
    ));
    let capture = LogDigester::new().digest_file(file.path()).unwrap();

    assert_eq!(capture.len(), 3);
    assert!(capture.textual);
    assert_eq!(capture.transport, TransportHint::Pty);
    let serial = capture.serial.unwrap();
    assert_eq!((serial.baud, serial.parity), (4800, Parity::Odd));
    assert!(matches!(capture.records[1], LogRecord::Directive { .. }));
    assert_eq!(
        capture.records[2].bytes(),
        b"$GPRMC,073124.000,A,5742.434,N,1141.713,E,1.00,0.00,280511,,,S*46\r\n"
    );
}

#[test]
fn test_digest_udp_capture_with_predump() {
    let file = capture_file("# Sent over UDP\n!AIVDM,1,1,,A,13u?etPv2;0n:dDPwUM1U1Cb069D,0*24\n");
    let capture = LogDigester::new()
        .with_predump(true)
        .digest_file(file.path())
        .unwrap();
    assert_eq!(capture.transport, TransportHint::Udp);
    assert_eq!(capture.len(), 1);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = LogDigester::new()
        .digest_file(&dir.path().join("absent.log"))
        .unwrap_err();
    assert!(matches!(err, HarnessError::IoError(_)));
}

#[test]
fn test_bad_serial_line_aborts_digest() {
    let file = capture_file("# Serial: 4800 8N7\n$GPRMC,x*00\n");
    let err = LogDigester::new().digest_file(file.path()).unwrap_err();
    assert!(matches!(err, HarnessError::InvalidSerialSpec { .. }));
}
