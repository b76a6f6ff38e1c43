//! Algorithm suites and key-size policy.

use crate::error::CryptoError;

/// Symmetric algorithm suite governing session key sizes.
///
/// Mirrors the WS-SecurityPolicy `BasicNNN` family: the suite fixes the
/// derived key length and the range of key sizes an issued token may carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AlgorithmSuite {
    /// 128-bit symmetric keys
    Basic128,
    /// 192-bit symmetric keys
    Basic192,
    /// 256-bit symmetric keys
    #[default]
    Basic256,
}

impl AlgorithmSuite {
    /// Key length produced for new session keys.
    pub fn default_key_bits(self) -> usize {
        match self {
            Self::Basic128 => 128,
            Self::Basic192 => 192,
            Self::Basic256 => 256,
        }
    }

    /// Smallest key size accepted from an issuer.
    pub fn min_key_bits(self) -> usize {
        self.default_key_bits()
    }

    /// Largest key size accepted from an issuer.
    pub fn max_key_bits(self) -> usize {
        // Issuers may hand out longer keys than the suite needs; 512 bits is
        // the largest HMAC-SHA256 block worth of key.
        512
    }

    /// Whether `bits` is an acceptable symmetric key size for this suite.
    pub fn is_key_size_supported(self, bits: usize) -> bool {
        bits % 8 == 0 && (self.min_key_bits()..=self.max_key_bits()).contains(&bits)
    }

    /// Reject key sizes outside the suite's accepted range.
    pub fn validate_key_size(self, bits: usize) -> Result<(), CryptoError> {
        if self.is_key_size_supported(bits) {
            Ok(())
        } else {
            Err(CryptoError::KeySizeInvalid {
                bits,
                min: self.min_key_bits(),
                max: self.max_key_bits(),
            })
        }
    }

    /// Stable name for logs and configuration.
    pub fn name(self) -> &'static str {
        match self {
            Self::Basic128 => "Basic128",
            Self::Basic192 => "Basic192",
            Self::Basic256 => "Basic256",
        }
    }

    /// Parse a suite name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "basic128" => Some(Self::Basic128),
            "basic192" => Some(Self::Basic192),
            "basic256" => Some(Self::Basic256),
            _ => None,
        }
    }
}
