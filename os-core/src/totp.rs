use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::sync::Arc;
use subtle::ConstantTimeEq;

const PERIOD_SECS: i64 = 30;
const DIGITS: usize = 6;
const DRIFT_STEPS: i64 = 1;

type HmacSha1 = Hmac<Sha1>;
type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// RFC 6238 time-based one-time passwords over HMAC-SHA1, with a one-step
/// drift tolerance in both directions.
pub struct Totp {
    secret: Vec<u8>,
    now: Clock,
}

impl Totp {
    /// Creates a verifier from a base32-encoded secret. The secret may be
    /// lowercase, surrounded by whitespace, or unpadded.
    pub fn new(base32_secret: &str) -> Result<Self> {
        let mut clean = base32_secret
            .trim()
            .to_ascii_uppercase()
            .trim_end_matches('=')
            .to_string();
        let rem = clean.len() % 8;
        if rem != 0 {
            clean.push_str(&"=".repeat(8 - rem));
        }

        let secret = data_encoding::BASE32
            .decode(clean.as_bytes())
            .context("invalid base32 secret")?;
        if secret.is_empty() {
            bail!("empty totp secret");
        }

        Ok(Self {
            secret,
            now: Arc::new(Utc::now),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_clock(mut self, now: Clock) -> Self {
        self.now = now;
        self
    }

    /// Returns true iff `code` is the 6-digit code for the current time step
    /// or one step to either side. Each comparison is constant-time.
    pub fn verify(&self, code: &str) -> bool {
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }

        let counter = (self.now)().timestamp() / PERIOD_SECS;
        let mut valid = false;
        for offset in -DRIFT_STEPS..=DRIFT_STEPS {
            let expected = hotp(&self.secret, counter + offset);
            valid |= bool::from(expected.as_bytes().ct_eq(code.as_bytes()));
        }
        valid
    }

    /// The code that verifies at time `t`. Used by tests that need a known
    /// valid code.
    #[cfg(test)]
    pub(crate) fn code_at(&self, t: DateTime<Utc>) -> String {
        hotp(&self.secret, t.timestamp() / PERIOD_SECS)
    }
}

/// RFC 4226 HOTP: HMAC-SHA1 over the big-endian counter, dynamic truncation,
/// six decimal digits.
fn hotp(secret: &[u8], counter: i64) -> String {
    // HMAC accepts any key length; new() rejects empty secrets. An empty
    // string never matches a six-digit code, so fail closed.
    let Ok(mut mac) = HmacSha1::new_from_slice(secret) else {
        return String::new();
    };
    mac.update(&counter.to_be_bytes());
    let sum = mac.finalize().into_bytes();

    let offset = (sum[sum.len() - 1] & 0x0f) as usize;
    let code = u32::from_be_bytes([sum[offset], sum[offset + 1], sum[offset + 2], sum[offset + 3]])
        & 0x7fff_ffff;
    format!("{:06}", code % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "JBSWY3DPEHPK3PXP";

    fn fixed(ts: i64) -> Clock {
        Arc::new(move || DateTime::from_timestamp(ts, 0).unwrap_or_default())
    }

    #[test]
    fn rfc4226_reference_vectors() {
        // Appendix D of RFC 4226, secret "12345678901234567890".
        let secret = b"12345678901234567890";
        assert_eq!(hotp(secret, 0), "755224");
        assert_eq!(hotp(secret, 1), "287082");
        assert_eq!(hotp(secret, 9), "520489");
    }

    #[test]
    fn verifies_current_and_adjacent_steps() {
        let t0 = 1_700_000_000;
        let totp = Totp::new(SECRET).unwrap().with_clock(fixed(t0));

        for drift in [-30, 0, 30] {
            let code = hotp(
                &Totp::new(SECRET).unwrap().secret,
                (t0 + drift) / PERIOD_SECS,
            );
            assert!(totp.verify(&code), "code at drift {drift} should verify");
        }
    }

    #[test]
    fn rejects_codes_outside_the_drift_window() {
        let t0 = 1_700_000_000;
        let totp = Totp::new(SECRET).unwrap().with_clock(fixed(t0));

        let far = hotp(&Totp::new(SECRET).unwrap().secret, t0 / PERIOD_SECS + 2);
        let near = hotp(&Totp::new(SECRET).unwrap().secret, t0 / PERIOD_SECS);
        if far != near {
            assert!(!totp.verify(&far));
        }
    }

    #[test]
    fn rejects_malformed_codes() {
        let totp = Totp::new(SECRET).unwrap();
        assert!(!totp.verify(""));
        assert!(!totp.verify("12345"));
        assert!(!totp.verify("1234567"));
        assert!(!totp.verify("abcdef"));
        assert!(!totp.verify("12345a"));
    }

    #[test]
    fn secret_normalization_accepts_sloppy_input() {
        let t0 = 1_700_000_000;
        let reference = Totp::new(SECRET).unwrap().with_clock(fixed(t0));
        let code = reference.code_at(DateTime::from_timestamp(t0, 0).unwrap());

        for variant in [
            "jbswy3dpehpk3pxp",
            "  JBSWY3DPEHPK3PXP  ",
            "JBSWY3DPEHPK3PXP====",
        ] {
            let totp = Totp::new(variant).unwrap().with_clock(fixed(t0));
            assert!(totp.verify(&code), "variant {variant:?} should verify");
        }
    }

    #[test]
    fn rejects_empty_or_malformed_secrets() {
        assert!(Totp::new("").is_err());
        assert!(Totp::new("   ").is_err());
        assert!(Totp::new("not-base32!!").is_err());
    }
}
