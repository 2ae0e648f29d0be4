//! Selector tokens
//!
//! A `Selectors` value records why an account was selected. It is persisted
//! space-joined in the account-selectors role tag and read back during
//! collation, so `encode` and `decode` are the only way in or out.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    AllDomains,
    Domain,
    AllEnvironments,
    Environment,
    AllQualities,
    Quality,
    Substrate,
    Admin,
    Humans,
    Management,
    Special,
    Number,
}

impl Selector {
    pub const ALL: [Selector; 12] = [
        Selector::AllDomains,
        Selector::Domain,
        Selector::AllEnvironments,
        Selector::Environment,
        Selector::AllQualities,
        Selector::Quality,
        Selector::Substrate,
        Selector::Admin,
        Selector::Humans,
        Selector::Management,
        Selector::Special,
        Selector::Number,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Selector::AllDomains => "all-domains",
            Selector::Domain => "domain",
            Selector::AllEnvironments => "all-environments",
            Selector::Environment => "environment",
            Selector::AllQualities => "all-qualities",
            Selector::Quality => "quality",
            Selector::Substrate => "substrate",
            Selector::Admin => "admin",
            Selector::Humans => "humans",
            Selector::Management => "management",
            Selector::Special => "special",
            Selector::Number => "number",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == token)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered list of selector tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors(pub Vec<Selector>);

/// Result of decoding a persisted tag value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedSelectors {
    pub selectors: Selectors,
    /// Tokens outside the known vocabulary, kept for reporting
    pub unknown: Vec<String>,
}

impl Selectors {
    pub fn new(selectors: Vec<Selector>) -> Self {
        Self(selectors)
    }

    pub fn one(selector: Selector) -> Self {
        Self(vec![selector])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selector> {
        self.0.iter()
    }

    pub fn contains(&self, selector: Selector) -> bool {
        self.0.contains(&selector)
    }

    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(Selector::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn decode(raw: &str) -> DecodedSelectors {
        let mut decoded = DecodedSelectors::default();
        for token in raw.split(' ').filter(|t| !t.is_empty()) {
            match Selector::parse(token) {
                Some(selector) => decoded.selectors.0.push(selector),
                None => decoded.unknown.push(token.to_string()),
            }
        }
        decoded
    }
}

impl fmt::Display for Selectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
