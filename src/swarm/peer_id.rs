use std::fmt;
use std::str::FromStr;

/// numeric id of a swarm member, carried on the wire as exactly 4 ascii digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PeerId(u16);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerIdError {
    #[error("peer id {0} does not fit in {digits} digits", digits = PeerId::DIGITS)]
    TooLarge(u32),
    #[error("peer id {0:?} is not {digits} ascii digits", digits = PeerId::DIGITS)]
    NotDigits(String),
}

impl PeerId {
    pub const DIGITS: usize = 4;
    pub const MAX: u16 = 9999;

    pub fn new(id: u32) -> Result<Self, PeerIdError> {
        if id > Self::MAX as u32 {
            return Err(PeerIdError::TooLarge(id));
        }
        Ok(Self(id as u16))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// zero padded ascii digits, e.g `7` becomes `b"0007"`.
    pub fn to_digits(self) -> [u8; Self::DIGITS] {
        let mut digits = [b'0'; Self::DIGITS];
        let mut rest = self.0;
        for pos in digits.iter_mut().rev() {
            *pos = b'0' + (rest % 10) as u8;
            rest /= 10;
        }
        digits
    }

    pub fn from_digits(digits: &[u8; Self::DIGITS]) -> Result<Self, PeerIdError> {
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(PeerIdError::NotDigits(
                String::from_utf8_lossy(digits).into_owned(),
            ));
        }

        let id = digits
            .iter()
            .fold(0u16, |acc, digit| acc * 10 + (digit - b'0') as u16);
        Ok(Self(id))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u32 = s
            .parse()
            .map_err(|_| PeerIdError::NotDigits(s.to_string()))?;
        Self::new(id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, b"0000")]
    #[case(7, b"0007")]
    #[case(1001, b"1001")]
    #[case(9999, b"9999")]
    fn test_digits_round_trip(#[case] id: u32, #[case] digits: &[u8; 4]) {
        let peer_id = PeerId::new(id).unwrap();
        assert_eq!(&peer_id.to_digits(), digits);
        assert_eq!(PeerId::from_digits(digits).unwrap(), peer_id);
    }

    #[rstest]
    #[case(10_000)]
    #[case(123_456)]
    fn test_rejects_ids_that_would_truncate(#[case] id: u32) {
        assert_eq!(PeerId::new(id), Err(PeerIdError::TooLarge(id)));
    }

    #[rstest]
    #[case(b"10a1")]
    #[case(b" 101")]
    #[case(b"\0\0\0\0")]
    fn test_rejects_non_digit_bytes(#[case] digits: &[u8; 4]) {
        assert!(matches!(
            PeerId::from_digits(digits),
            Err(PeerIdError::NotDigits(_))
        ));
    }

    #[rstest]
    fn test_parse_from_str() {
        assert_eq!("1002".parse::<PeerId>().unwrap().get(), 1002);
        assert!("-1".parse::<PeerId>().is_err());
        assert!("10000".parse::<PeerId>().is_err());
    }
}
