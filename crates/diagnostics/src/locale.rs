use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unsupported locale '{0}'")]
pub struct UnknownLocale(pub String);

/// Languages the diagnostic table is translated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Es,
    Fr,
    De,
}

impl Locale {
    pub const ALL: [Locale; 4] = [Locale::En, Locale::Es, Locale::Fr, Locale::De];

    /// Resolves a BCP-47-ish tag (`es`, `es-MX`, `fr_CA`), falling back to English.
    pub fn from_tag(tag: &str) -> Self {
        tag.parse().unwrap_or_default()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Es => "es",
            Locale::Fr => "fr",
            Locale::De => "de",
        }
    }
}

impl FromStr for Locale {
    type Err = UnknownLocale;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        let language = normalized
            .split(['-', '_', '.'])
            .next()
            .unwrap_or_default();
        match language {
            "en" => Ok(Locale::En),
            "es" => Ok(Locale::Es),
            "fr" => Ok(Locale::Fr),
            "de" => Ok(Locale::De),
            _ => Err(UnknownLocale(raw.to_string())),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_region_tags() {
        assert_eq!("es-MX".parse::<Locale>(), Ok(Locale::Es));
        assert_eq!("fr_CA".parse::<Locale>(), Ok(Locale::Fr));
        assert_eq!("DE".parse::<Locale>(), Ok(Locale::De));
        assert_eq!("en_US.UTF-8".parse::<Locale>(), Ok(Locale::En));
    }

    #[test]
    fn unknown_tag_falls_back_to_english() {
        assert!("pt-BR".parse::<Locale>().is_err());
        assert_eq!(Locale::from_tag("pt-BR"), Locale::En);
        assert_eq!(Locale::from_tag(""), Locale::En);
    }
}
