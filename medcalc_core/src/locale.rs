//! Locales and per-locale text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Supported display locales
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Locale {
    #[serde(rename = "zh-TW")]
    ZhTw,
    #[serde(rename = "en")]
    En,
    #[serde(rename = "ja")]
    Ja,
}

impl Locale {
    /// Locale used when a requested translation is missing
    pub const DEFAULT: Locale = Locale::ZhTw;

    pub const ALL: [Locale; 3] = [Locale::ZhTw, Locale::En, Locale::Ja];

    pub fn as_str(self) -> &'static str {
        match self {
            Locale::ZhTw => "zh-TW",
            Locale::En => "en",
            Locale::Ja => "ja",
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale::DEFAULT
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('_', "-").to_lowercase();
        match normalized.as_str() {
            "zh-tw" | "zh-hant" | "zh" => Ok(Locale::ZhTw),
            "en" | "en-us" | "en-gb" => Ok(Locale::En),
            "ja" | "ja-jp" => Ok(Locale::Ja),
            _ => Err(crate::Error::Config(format!("Unsupported locale: {}", s))),
        }
    }
}

/// Text available in one or more locales
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LocalizedText(BTreeMap<Locale, String>);

impl LocalizedText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, locale: Locale, text: impl Into<String>) -> Self {
        self.0.insert(locale, text.into());
        self
    }

    /// Same text for every locale (numbers, units, drug names)
    pub fn uniform(text: impl Into<String>) -> Self {
        let text = text.into();
        Self(Locale::ALL.iter().map(|l| (*l, text.clone())).collect())
    }

    /// Shorthand for the three supported locales
    pub fn tri(zh_tw: impl Into<String>, en: impl Into<String>, ja: impl Into<String>) -> Self {
        Self::new()
            .with(Locale::ZhTw, zh_tw)
            .with(Locale::En, en)
            .with(Locale::Ja, ja)
    }

    pub fn get(&self, locale: Locale) -> Option<&str> {
        self.0.get(&locale).map(String::as_str)
    }

    pub fn has(&self, locale: Locale) -> bool {
        self.0.get(&locale).is_some_and(|t| !t.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(String::is_empty)
    }

    /// Resolve text for `requested`.
    ///
    /// Fallback order: requested locale, then [`Locale::DEFAULT`], then any
    /// non-empty translation, then the empty string.
    pub fn resolve(&self, requested: Locale) -> &str {
        [requested, Locale::DEFAULT]
            .iter()
            .find_map(|l| self.0.get(l).filter(|t| !t.is_empty()))
            .or_else(|| self.0.values().find(|t| !t.is_empty()))
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locale_variants() {
        assert_eq!("zh-TW".parse::<Locale>().unwrap(), Locale::ZhTw);
        assert_eq!("zh_tw".parse::<Locale>().unwrap(), Locale::ZhTw);
        assert_eq!("en-US".parse::<Locale>().unwrap(), Locale::En);
        assert_eq!("JA".parse::<Locale>().unwrap(), Locale::Ja);
        assert!("fr".parse::<Locale>().is_err());
    }

    #[test]
    fn test_resolve_prefers_requested() {
        let text = LocalizedText::tri("身體質量指數", "Body Mass Index", "体格指数");
        assert_eq!(text.resolve(Locale::En), "Body Mass Index");
        assert_eq!(text.resolve(Locale::Ja), "体格指数");
    }

    #[test]
    fn test_resolve_falls_back_to_default_then_any() {
        let text = LocalizedText::new().with(Locale::ZhTw, "預設");
        assert_eq!(text.resolve(Locale::Ja), "預設");

        let only_en = LocalizedText::new().with(Locale::En, "English only");
        assert_eq!(only_en.resolve(Locale::Ja), "English only");

        assert_eq!(LocalizedText::new().resolve(Locale::En), "");
    }

    #[test]
    fn test_empty_translation_is_skipped() {
        let text = LocalizedText::new()
            .with(Locale::En, "")
            .with(Locale::ZhTw, "中文");
        assert_eq!(text.resolve(Locale::En), "中文");
        assert!(!text.has(Locale::En));
    }

    #[test]
    fn test_serializes_as_locale_map() {
        let text = LocalizedText::new().with(Locale::ZhTw, "a").with(Locale::En, "b");
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["zh-TW"], "a");
        assert_eq!(json["en"], "b");
    }
}
