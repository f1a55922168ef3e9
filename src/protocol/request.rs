use super::codec::{Result, WireRead, WireWrite};

/// Header opening every request: the operation code and the client
/// transaction id the server echoes back in its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub op: u8,
    pub client_tx_id: i32,
}

impl RequestHeader {
    pub fn new(op: u8, client_tx_id: i32) -> Self {
        Self { op, client_tx_id }
    }

    pub fn read<R: WireRead + ?Sized>(input: &mut R) -> Result<Self> {
        let op = input.read_u8()?;
        let client_tx_id = input.read_i32()?;
        Ok(Self { op, client_tx_id })
    }

    pub fn write<W: WireWrite + ?Sized>(&self, output: &mut W) -> Result<()> {
        output.write_u8(self.op)?;
        output.write_i32(self.client_tx_id)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::protocol::{Decoder, Encoder};

    use super::*;

    #[test]
    fn request_header_layout() {
        let mut encoder = Encoder::new(Vec::new());
        RequestHeader::new(0x29, 7).write(&mut encoder).unwrap();
        let bytes = encoder.into_inner();

        assert_eq!(bytes, vec![0x29, 0, 0, 0, 7]);

        let mut decoder = Decoder::new(Cursor::new(bytes), 16);
        assert_eq!(
            RequestHeader::read(&mut decoder).unwrap(),
            RequestHeader::new(0x29, 7)
        );
    }
}
