//! Loader registry
//!
//! Maps the loader tags accepted in function properties to the loaders the
//! bundler understands.

use serde::Serialize;

/// Bundler loaders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
    Css,
    Json,
    Text,
    Base64,
    File,
    #[serde(rename = "dataurl")]
    DataUrl,
    Binary,
}

impl Loader {
    /// Every loader, in registry order
    pub const ALL: [Loader; 11] = [
        Self::Js,
        Self::Jsx,
        Self::Ts,
        Self::Tsx,
        Self::Css,
        Self::Json,
        Self::Text,
        Self::Base64,
        Self::File,
        Self::DataUrl,
        Self::Binary,
    ];

    /// Look up a configuration tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "js" => Some(Self::Js),
            "jsx" => Some(Self::Jsx),
            "ts" => Some(Self::Ts),
            "tsx" => Some(Self::Tsx),
            "css" => Some(Self::Css),
            "json" => Some(Self::Json),
            "text" => Some(Self::Text),
            "base64" => Some(Self::Base64),
            "file" => Some(Self::File),
            "dataurl" => Some(Self::DataUrl),
            "binary" => Some(Self::Binary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Js => "js",
            Self::Jsx => "jsx",
            Self::Ts => "ts",
            Self::Tsx => "tsx",
            Self::Css => "css",
            Self::Json => "json",
            Self::Text => "text",
            Self::Base64 => "base64",
            Self::File => "file",
            Self::DataUrl => "dataurl",
            Self::Binary => "binary",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_round_trips() {
        for loader in Loader::ALL {
            assert_eq!(Loader::from_tag(loader.as_str()), Some(loader));
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(Loader::from_tag("yaml"), None);
        assert_eq!(Loader::from_tag("JSON"), None);
        assert_eq!(Loader::from_tag(""), None);
    }
}
