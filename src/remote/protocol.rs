use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use vdtap::structs::register::Register;
use vdtap::structs::status::VideoChipType;
use vdtap::utils::errors::DeviceError;

pub const NOT_CONNECTED: &str = "Device not connected, ignoring\n";
pub const INVALID_REQUEST: &str = "Invalid request, ignoring\n";

/// One line of the remote control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// `TYPE?`
    ChipType,
    /// `RGB?`
    Image,
    /// `R3?`, `ER0?`
    Read(Register),
    /// `R3=2A`, `ER0=91`
    Write(Register, u8),
    Invalid,
}

impl Request {
    /// Parses a request line. Surrounding whitespace is ignored; everything
    /// else is case sensitive and register values take exactly two
    /// uppercase hex digits.
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "TYPE?" => Request::ChipType,
            "RGB?" => Request::Image,
            other => Self::parse_register(other).unwrap_or(Request::Invalid),
        }
    }

    fn parse_register(line: &str) -> Option<Self> {
        let (execute, rest) = match line.strip_prefix('E') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let rest = rest.strip_prefix('R')?;

        let mut chars = rest.chars();
        let index = chars.next()?.to_digit(8)? as u8;
        let register = Register::new(index, execute).ok()?;

        match chars.as_str() {
            "?" => Some(Request::Read(register)),
            assignment => {
                let digits = assignment.strip_prefix('=')?;
                if digits.len() != 2 || !digits.bytes().all(is_upper_hex) {
                    return None;
                }
                let value = u8::from_str_radix(digits, 16).ok()?;
                Some(Request::Write(register, value))
            }
        }
    }
}

fn is_upper_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
}

/// What the server needs from the capture side.
pub trait DeviceAccess: Send + Sync {
    /// Chip of the connected board, `None` without a board.
    fn chip_type(&self) -> Option<VideoChipType>;

    /// PNG of the latest decoded frame.
    fn latest_png(&self) -> Option<Vec<u8>>;

    fn bus_read(&self, register: Register) -> Result<u8, DeviceError>;

    fn bus_write(&self, register: Register, value: u8) -> Result<(), DeviceError>;
}

/// Reply text for `request`, possibly empty.
pub fn respond<D: DeviceAccess + ?Sized>(request: Request, device: &D) -> String {
    match request {
        Request::ChipType => match device.chip_type() {
            Some(chip) => format!("{chip}\n"),
            None => NOT_CONNECTED.to_string(),
        },
        Request::Image => match device.latest_png() {
            Some(png) => format!("{}\n", STANDARD.encode(png)),
            None => "\n".to_string(),
        },
        Request::Read(register) => match device.bus_read(register) {
            Ok(value) => format!("{value:02X}\n"),
            Err(e) => {
                log::debug!("Reading {register} failed: {e}");
                NOT_CONNECTED.to_string()
            }
        },
        Request::Write(register, value) => match device.bus_write(register, value) {
            Ok(()) => String::new(),
            Err(e) => {
                log::debug!("Writing {register} failed: {e}");
                NOT_CONNECTED.to_string()
            }
        },
        Request::Invalid => INVALID_REQUEST.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeDevice {
        pub chip: Option<VideoChipType>,
        pub png: Option<Vec<u8>>,
        pub registers: Mutex<[u8; 16]>,
    }

    impl FakeDevice {
        pub(crate) fn connected() -> Self {
            Self {
                chip: Some(VideoChipType::Ts9347),
                ..Default::default()
            }
        }
    }

    impl DeviceAccess for FakeDevice {
        fn chip_type(&self) -> Option<VideoChipType> {
            self.chip
        }

        fn latest_png(&self) -> Option<Vec<u8>> {
            self.png.clone()
        }

        fn bus_read(&self, register: Register) -> Result<u8, DeviceError> {
            self.chip.ok_or(DeviceError::Closed)?;
            Ok(self.registers.lock().unwrap()[usize::from(register.raw())])
        }

        fn bus_write(&self, register: Register, value: u8) -> Result<(), DeviceError> {
            self.chip.ok_or(DeviceError::Closed)?;
            self.registers.lock().unwrap()[usize::from(register.raw())] = value;
            Ok(())
        }
    }

    fn reg(index: u8, execute: bool) -> Register {
        Register::new(index, execute).unwrap()
    }

    #[test]
    fn parses_requests() {
        assert_eq!(Request::parse("TYPE?"), Request::ChipType);
        assert_eq!(Request::parse("  RGB?\r\n"), Request::Image);
        assert_eq!(Request::parse("R3?"), Request::Read(reg(3, false)));
        assert_eq!(Request::parse("ER7?"), Request::Read(reg(7, true)));
        assert_eq!(Request::parse("R0=2A"), Request::Write(reg(0, false), 0x2A));
        assert_eq!(Request::parse("ER1=FF"), Request::Write(reg(1, true), 0xFF));
    }

    #[test]
    fn rejects_malformed_requests() {
        for line in [
            "", "type?", "TYPE", "R8?", "R?", "R12?", "r3?", "ER3", "R3=2a", "R3=2", "R3=2AB",
            "R3= 2A", "XR3?", "EER3?", "R3?x",
        ] {
            assert_eq!(Request::parse(line), Request::Invalid, "{line:?}");
        }
    }

    #[test]
    fn replies_with_connected_device() {
        let device = FakeDevice {
            png: Some(vec![0x89, b'P', b'N', b'G']),
            ..FakeDevice::connected()
        };

        assert_eq!(respond(Request::ChipType, &device), "TS9347\n");
        assert_eq!(respond(Request::Image, &device), "iVBORw==\n");
        assert_eq!(respond(Request::Write(reg(2, true), 0x0B), &device), "");
        assert_eq!(respond(Request::Read(reg(2, true)), &device), "0B\n");
        assert_eq!(respond(Request::Read(reg(2, false)), &device), "00\n");
        assert_eq!(respond(Request::Invalid, &device), INVALID_REQUEST);
    }

    #[test]
    fn replies_without_device() {
        let device = FakeDevice::default();

        assert_eq!(respond(Request::ChipType, &device), NOT_CONNECTED);
        assert_eq!(respond(Request::Image, &device), "\n");
        assert_eq!(respond(Request::Read(reg(0, false)), &device), NOT_CONNECTED);
        assert_eq!(respond(Request::Write(reg(0, false), 1), &device), NOT_CONNECTED);
    }
}
