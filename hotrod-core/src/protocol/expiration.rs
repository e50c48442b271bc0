//! Lifespan and max-idle encoding.

use std::time::Duration;

const TIME_UNIT_SECONDS: u8 = 0x00;
const TIME_UNIT_MILLISECONDS: u8 = 0x01;
const TIME_UNIT_DEFAULT: u8 = 0x07;
const TIME_UNIT_INFINITE: u8 = 0x08;

/// How long an entry lives, or how long it may stay idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expiration {
    /// Use the server-side cache configuration.
    #[default]
    Default,
    /// Never expire.
    Infinite,
    /// Expire after this duration.
    After(Duration),
}

impl Expiration {
    /// Unit code and the value to send, if any.
    fn encode(self) -> (u8, Option<u64>) {
        match self {
            Expiration::Default => (TIME_UNIT_DEFAULT, None),
            Expiration::Infinite => (TIME_UNIT_INFINITE, None),
            Expiration::After(d) if d.is_zero() => (TIME_UNIT_DEFAULT, None),
            Expiration::After(d) if d.subsec_nanos() == 0 => (TIME_UNIT_SECONDS, Some(d.as_secs())),
            Expiration::After(d) => (
                TIME_UNIT_MILLISECONDS,
                Some(u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)),
            ),
        }
    }
}

/// Expiration settings of a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationParams {
    /// Time to live since creation.
    pub lifespan: Expiration,
    /// Time to live since last access.
    pub max_idle: Expiration,
}

impl ExpirationParams {
    /// Creates expiration settings.
    pub fn new(lifespan: Expiration, max_idle: Expiration) -> Self {
        Self { lifespan, max_idle }
    }

    /// Encodes as the time-units byte followed by the values that are present.
    ///
    /// The lifespan unit occupies the high nibble and the max-idle unit the low one.
    pub fn encoded(self) -> (u8, Option<u64>, Option<u64>) {
        let (lifespan_unit, lifespan) = self.lifespan.encode();
        let (max_idle_unit, max_idle) = self.max_idle.encode();
        ((lifespan_unit << 4) | max_idle_unit, lifespan, max_idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_expiration_is_a_single_byte() {
        let (units, lifespan, max_idle) = ExpirationParams::default().encoded();
        assert_eq!(units, 0x77);
        assert_eq!(lifespan, None);
        assert_eq!(max_idle, None);
    }

    #[test]
    fn test_whole_seconds_use_seconds_unit() {
        let params = ExpirationParams::new(Expiration::After(Duration::from_secs(30)), Expiration::Infinite);
        assert_eq!(params.encoded(), (0x08, Some(30), None));
    }

    #[test]
    fn test_fractional_durations_use_milliseconds() {
        let params = ExpirationParams::new(
            Expiration::Default,
            Expiration::After(Duration::from_millis(1500)),
        );
        assert_eq!(params.encoded(), (0x71, None, Some(1500)));
    }
}
