//! Path grammar for the `/v2/*` URI space.
//!
//! Repository names span multiple URL segments (`myorg/myrepo`), so the
//! dispatcher matches whole request paths against anchored patterns built
//! from the fragments below. A path that fails its pattern is simply no
//! route.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest as _, Sha256};

use crate::error::{RegistryError, RegistryResult};

/// One or more `/`-separated name components, each lowercase alphanumeric
/// with internal `.`, `_`, or `-` separators.
pub(crate) const NAME: &str =
    r"[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*";

/// A tag: up to 128 word characters, not starting with a separator.
pub(crate) const TAG: &str = r"[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}";

/// An opaque reference segment: a tag, a digest, or an upload session id.
/// Strict interpretation happens in the handlers.
pub(crate) const REFERENCE: &str = r"[a-zA-Z0-9_][a-zA-Z0-9._:-]*";

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{TAG}$")).expect("tag pattern"));

static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<algo>[a-z0-9]+(?:[.+_-][a-z0-9]+)*):(?P<hex>[a-f0-9]+)$")
        .expect("digest pattern")
});

/// Whether `s` is a well-formed tag.
pub(crate) fn is_tag(s: &str) -> bool {
    TAG_RE.is_match(s)
}

/// An algorithm-prefixed content digest, e.g. `sha256:e3b0c4...`.
///
/// Parsing accepts the algorithms this registry can verify and requires
/// the exact hex length for each.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    serialized: String,
    algo: Range<usize>,
    hex: Range<usize>,
}

impl Digest {
    pub fn parse(s: &str) -> RegistryResult<Self> {
        let captures = DIGEST_RE
            .captures(s)
            .ok_or_else(|| RegistryError::DigestInvalid(s.to_owned()))?;
        let algo = captures.name("algo").expect("algo group");
        let hex = captures.name("hex").expect("hex group");
        let expected_len = match algo.as_str() {
            "sha256" => 64,
            "sha512" => 128,
            _ => return Err(RegistryError::DigestInvalid(s.to_owned())),
        };
        if hex.as_str().len() != expected_len {
            return Err(RegistryError::DigestInvalid(s.to_owned()));
        }
        Ok(Digest {
            serialized: s.to_owned(),
            algo: algo.range(),
            hex: hex.range(),
        })
    }

    /// Digest of `content` under the default `sha256` algorithm.
    pub fn from_content(content: &[u8]) -> Self {
        let serialized = format!("sha256:{}", hex::encode(Sha256::digest(content)));
        Digest::parse(&serialized).expect("sha256 digest of content")
    }

    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    pub fn algorithm(&self) -> &str {
        &self.serialized[self.algo.clone()]
    }

    pub fn hex(&self) -> &str {
        &self.serialized[self.hex.clone()]
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_parses_sha256() {
        let hex64 = "a".repeat(64);
        let digest = Digest::parse(&format!("sha256:{hex64}")).unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.hex(), hex64);
        assert_eq!(digest.as_str(), format!("sha256:{hex64}"));
    }

    #[test]
    fn digest_parses_sha512() {
        let hex128 = "0f".repeat(64);
        let digest = Digest::parse(&format!("sha512:{hex128}")).unwrap();
        assert_eq!(digest.algorithm(), "sha512");
    }

    #[test]
    fn digest_rejects_malformed() {
        let uppercase = format!("sha256:{}", "A".repeat(64));
        let unknown_algo = format!("md5:{}", "a".repeat(32));
        let short_sha512 = format!("sha512:{}", "a".repeat(64));
        let cases: [&str; 8] = [
            "notadigest",
            "sha256",
            "sha256:",
            ":abcd",
            "sha256:deadbeef",
            &uppercase,
            &unknown_algo,
            &short_sha512,
        ];
        for bad in cases {
            assert!(Digest::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn digest_from_content_is_parseable() {
        let digest = Digest::from_content(b"cat");
        assert_eq!(
            digest.as_str(),
            "sha256:77af778b51abd4a3c51c5ddd97204a9c3ae614ebccb75a606c3b6865aed6744e"
        );
    }

    #[test]
    fn name_fragment_matches_nested_names() {
        let re = Regex::new(&format!("^{NAME}$")).unwrap();
        for good in ["library", "myorg/myrepo", "a/b/c", "foo-bar.baz_1/qux"] {
            assert!(re.is_match(good), "rejected {good:?}");
        }
        for bad in ["", "UPPER", "foo//bar", "-leading", "trailing-", "a/"] {
            assert!(!re.is_match(bad), "accepted {bad:?}");
        }
    }

    #[test]
    fn tag_shapes() {
        assert!(is_tag("latest"));
        assert!(is_tag("v1.0_rc-2"));
        assert!(is_tag("_underscore"));
        assert!(!is_tag(".dot-first"));
        assert!(!is_tag("-dash-first"));
        assert!(!is_tag(""));
        assert!(!is_tag(&"x".repeat(129)));
    }
}
