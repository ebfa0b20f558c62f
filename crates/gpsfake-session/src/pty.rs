//! Pseudo-terminal transport.
//!
//! The harness keeps the master side and hands the slave path to the daemon,
//! which opens it like any serial GPS. Line parameters are applied to the
//! slave so the daemon sees the speed and framing the capture asked for.

use crate::transport::ByteTransport;
use gpsfake_common::error::{HarnessError, HarnessResult};
use gpsfake_nmea::capture::{Parity, SerialParams};
use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use nix::sys::termios::{
    cfsetspeed, tcdrain, tcflush, tcgetattr, tcsetattr, BaudRate, ControlFlags, FlushArg,
    InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices,
};
use std::fs::{File, OpenOptions};
use std::io::Write;
use tracing::{debug, trace};

/// Map a numeric line speed onto a termios rate.
pub fn baud_rate(baud: u32) -> HarnessResult<BaudRate> {
    let rate = match baud {
        0 => BaudRate::B0,
        50 => BaudRate::B50,
        75 => BaudRate::B75,
        110 => BaudRate::B110,
        134 => BaudRate::B134,
        150 => BaudRate::B150,
        200 => BaudRate::B200,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        1800 => BaudRate::B1800,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        other => return Err(HarnessError::InvalidBaudRate(other)),
    };
    Ok(rate)
}

/// A pty pair configured to look like a serial GPS.
#[derive(Debug)]
pub struct PtyTransport {
    name: String,
    master: PtyMaster,
    // Held open so the line settings survive until the daemon opens the device.
    slave: File,
}

impl PtyTransport {
    /// Allocate a pty and apply `params` to its slave side.
    pub fn open(params: &SerialParams) -> HarnessResult<Self> {
        let rate = baud_rate(params.baud)?;
        let fail = |what: &str, e: nix::Error| HarnessError::transport("pty", format!("{what}: {e}"));

        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)
            .map_err(|e| fail("posix_openpt", e))?;
        grantpt(&master).map_err(|e| fail("grantpt", e))?;
        unlockpt(&master).map_err(|e| fail("unlockpt", e))?;
        let name = ptsname_r(&master).map_err(|e| fail("ptsname", e))?;

        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&name)
            .map_err(|e| HarnessError::transport(&name, e))?;

        let mut tty = tcgetattr(&slave).map_err(|e| HarnessError::transport(&name, e))?;
        cfsetspeed(&mut tty, rate).map_err(|e| HarnessError::transport(&name, e))?;
        tty.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        tty.control_flags
            .remove(ControlFlags::PARENB | ControlFlags::PARODD | ControlFlags::CRTSCTS);
        tty.control_flags
            .insert(ControlFlags::CREAD | ControlFlags::CLOCAL);
        tty.input_flags = InputFlags::empty();
        tty.output_flags = OutputFlags::empty();
        tty.local_flags = LocalFlags::empty();

        tty.control_flags.remove(ControlFlags::CSIZE);
        tty.control_flags.insert(if params.data_bits == 7 {
            ControlFlags::CS7
        } else {
            ControlFlags::CS8
        });
        tty.control_flags.set(ControlFlags::CSTOPB, params.stop_bits == 2);
        match params.parity {
            Parity::None => {}
            Parity::Even => {
                tty.input_flags.insert(InputFlags::INPCK);
                tty.control_flags.insert(ControlFlags::PARENB);
            }
            Parity::Odd => {
                tty.input_flags.insert(InputFlags::INPCK);
                tty.control_flags
                    .insert(ControlFlags::PARENB | ControlFlags::PARODD);
            }
        }
        tcsetattr(&slave, SetArg::TCSANOW, &tty).map_err(|e| HarnessError::transport(&name, e))?;

        debug!(device = %name, params = %params, "Pty allocated");
        Ok(Self {
            name,
            master,
            slave,
        })
    }
}

impl ByteTransport for PtyTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> HarnessResult<()> {
        self.master
            .write_all(bytes)
            .map_err(|e| HarnessError::transport(&self.name, e))?;
        trace!(device = %self.name, len = bytes.len(), "Record written");
        Ok(())
    }

    fn discard_input(&mut self) -> HarnessResult<()> {
        tcflush(&self.master, FlushArg::TCIFLUSH).map_err(|e| HarnessError::transport(&self.name, e))
    }

    fn drain(&mut self) -> HarnessResult<()> {
        tcdrain(&self.master).map_err(|e| HarnessError::transport(&self.name, e))?;
        tcdrain(&self.slave).map_err(|e| HarnessError::transport(&self.name, e))
    }
}
