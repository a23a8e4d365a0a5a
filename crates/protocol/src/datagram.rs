use crate::register::Register;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Write = 0,
    Read = 1,
}

/// One 32-bit SPI frame sent to the chip.
///
/// Byte 0 is the register address shifted left by one, with the read bit at
/// the bottom; bytes 1 to 3 are the payload, most significant byte first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub register: Register,
    pub access: Access,
    pub payload: u32,
}

impl Datagram {
    pub fn write(register: Register, payload: u32) -> Self {
        Datagram {
            register,
            access: Access::Write,
            payload: payload & 0xFF_FFFF,
        }
    }

    pub fn read(register: Register) -> Self {
        Datagram {
            register,
            access: Access::Read,
            payload: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let [_, hi, mid, lo] = self.payload.to_be_bytes();
        [(self.register.addr() << 1) | self.access as u8, hi, mid, lo]
    }

    /// Decodes a frame, failing with the address if it names no known register.
    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self, u8> {
        let register = Register::try_from(bytes[0] >> 1)?;
        let access = if bytes[0] & 1 == 1 {
            Access::Read
        } else {
            Access::Write
        };
        Ok(Datagram {
            register,
            access,
            payload: u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]),
        })
    }
}

/// The frame that comes back while a [`Datagram`] goes out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    pub status: u8,
    pub payload: u32,
}

impl Reply {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Reply {
            status: bytes[0],
            payload: u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let [_, hi, mid, lo] = self.payload.to_be_bytes();
        [self.status, hi, mid, lo]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::{AccelParams, RampMode};

    #[test]
    fn frames_match_the_datasheet_layout() {
        let d = Datagram::write(Register::RampMode, RampMode::Hold.payload());
        assert_eq!(d.to_bytes(), [0b0001_0100, 0x00, 0b100, 0b11]);

        let d = Datagram::write(
            Register::PmulPdiv,
            AccelParams { pmul: 191, pdiv: 5 }.payload(),
        );
        assert_eq!(d.to_bytes(), [0x12, 0x00, 0xBF, 0x05]);

        let d = Datagram::read(Register::TypeVersion);
        assert_eq!(d.to_bytes(), [0x73, 0, 0, 0]);
        assert_eq!(Datagram::from_bytes(d.to_bytes()), Ok(d));
    }

    #[test]
    fn oversized_payloads_are_truncated() {
        let d = Datagram::write(Register::XTarget, 0x1234_5678);
        assert_eq!(d.to_bytes(), [0x00, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn unknown_addresses() {
        assert_eq!(Datagram::from_bytes([0x05 << 1, 0, 0, 0]), Err(0x05));
    }

    #[test]
    fn reply_bytes() {
        let r = Reply::from_bytes([0x15, 0x42, 0x91, 0x01]);
        assert_eq!(
            r,
            Reply {
                status: 0x15,
                payload: 0x42_9101
            }
        );
        assert_eq!(r.to_bytes(), [0x15, 0x42, 0x91, 0x01]);
    }
}
