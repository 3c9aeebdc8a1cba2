//! Ping response model and XML parsing.
//!
//! A node answers a ping with a status list naming cluster members:
//!
//! ```xml
//! <PingList>
//!   <PingItem><Name>10.0.0.1</Name><Status>OK</Status></PingItem>
//!   <PingItem><Name>10.0.0.2</Name><Status>ERROR</Status><Text>disk full</Text></PingItem>
//! </PingList>
//! ```

use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;
use thiserror::Error;

/// Errors produced while decoding a ping response.
#[derive(Debug, Error)]
pub enum PingParseError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("missing PingList root element")]
    MissingRoot,

    #[error("PingItem is missing a Name")]
    MissingName,

    #[error("PingItem '{0}' is missing a Status")]
    MissingStatus(String),
}

/// Reported status of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PingStatus {
    Ok,
    Error,
}

impl PingStatus {
    /// Interpret a status string; anything other than "ok" is an error.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("ok") {
            PingStatus::Ok
        } else {
            PingStatus::Error
        }
    }

    pub fn is_ok(self) -> bool {
        self == PingStatus::Ok
    }
}

/// One entry of a ping response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingItem {
    /// Node identity.
    pub name: String,
    pub status: PingStatus,
    /// Optional diagnostic text.
    pub text: Option<String>,
}

impl PingItem {
    pub fn new(name: impl Into<String>, status: PingStatus) -> Self {
        Self {
            name: name.into(),
            status,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// A decoded ping response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PingResponse {
    items: Vec<PingItem>,
}

impl PingResponse {
    pub fn new(items: Vec<PingItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[PingItem] {
        &self.items
    }

    /// Items keyed by name. A repeated name keeps its last item.
    pub fn item_map(&self) -> HashMap<&str, &PingItem> {
        self.items
            .iter()
            .map(|item| (item.name.as_str(), item))
            .collect()
    }

    /// Decode a `PingList` document.
    pub fn from_xml(xml: &[u8]) -> Result<Self, PingParseError> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text_start = true;
        reader.config_mut().trim_text_end = true;

        let mut saw_root = false;
        let mut items = Vec::new();
        let mut current: Option<PartialItem> = None;
        let mut text = String::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    text.clear();
                    match e.local_name().as_ref() {
                        b"PingList" => saw_root = true,
                        b"PingItem" => current = Some(PartialItem::default()),
                        _ => {}
                    }
                }
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"PingList" => saw_root = true,
                    b"PingItem" => return Err(PingParseError::MissingName),
                    _ => {}
                },
                Event::Text(e) => {
                    text.clear();
                    text.push_str(&e.unescape()?);
                }
                Event::End(e) => {
                    let value = std::mem::take(&mut text);
                    match e.local_name().as_ref() {
                        b"PingItem" => {
                            if let Some(item) = current.take() {
                                items.push(item.finish()?);
                            }
                        }
                        tag => {
                            if let Some(item) = current.as_mut() {
                                match tag {
                                    b"Name" => item.name = Some(value),
                                    b"Status" => item.status = Some(value),
                                    b"Text" => item.text = Some(value),
                                    _ => {}
                                }
                            }
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(PingParseError::MissingRoot);
        }
        Ok(Self { items })
    }
}

/// Fields collected while inside a `PingItem`.
#[derive(Default)]
struct PartialItem {
    name: Option<String>,
    status: Option<String>,
    text: Option<String>,
}

impl PartialItem {
    fn finish(self) -> Result<PingItem, PingParseError> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or(PingParseError::MissingName)?;
        let status = self
            .status
            .ok_or_else(|| PingParseError::MissingStatus(name.clone()))?;

        Ok(PingItem {
            name,
            status: PingStatus::parse(&status),
            text: self.text.filter(|t| !t.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping_list() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
            <PingList>
              <PingItem><Name>10.0.0.1</Name><Status>OK</Status></PingItem>
              <PingItem>
                <Name>10.0.0.2</Name>
                <Status>ERROR</Status>
                <Text>disk &amp; network down</Text>
              </PingItem>
            </PingList>"#;

        let response = PingResponse::from_xml(xml).unwrap();
        assert_eq!(response.items().len(), 2);

        let map = response.item_map();
        assert_eq!(map["10.0.0.1"].status, PingStatus::Ok);
        assert_eq!(map["10.0.0.2"].status, PingStatus::Error);
        assert_eq!(map["10.0.0.2"].text.as_deref(), Some("disk & network down"));
    }

    #[test]
    fn test_empty_list() {
        let response = PingResponse::from_xml(b"<PingList/>").unwrap();
        assert!(response.items().is_empty());

        let response = PingResponse::from_xml(b"<PingList></PingList>").unwrap();
        assert!(response.items().is_empty());
    }

    #[test]
    fn test_status_is_case_insensitive() {
        assert_eq!(PingStatus::parse("ok"), PingStatus::Ok);
        assert_eq!(PingStatus::parse(" OK "), PingStatus::Ok);
        assert_eq!(PingStatus::parse("error"), PingStatus::Error);
        assert_eq!(PingStatus::parse("WARN"), PingStatus::Error);
    }

    #[test]
    fn test_missing_root() {
        let result = PingResponse::from_xml(b"<Status>OK</Status>");
        assert!(matches!(result, Err(PingParseError::MissingRoot)));

        let result = PingResponse::from_xml(b"");
        assert!(matches!(result, Err(PingParseError::MissingRoot)));
    }

    #[test]
    fn test_item_without_name() {
        let xml = b"<PingList><PingItem><Status>OK</Status></PingItem></PingList>";
        let result = PingResponse::from_xml(xml);
        assert!(matches!(result, Err(PingParseError::MissingName)));
    }

    #[test]
    fn test_item_without_status() {
        let xml = b"<PingList><PingItem><Name>a</Name></PingItem></PingList>";
        let result = PingResponse::from_xml(xml);
        assert!(matches!(result, Err(PingParseError::MissingStatus(name)) if name == "a"));
    }

    #[test]
    fn test_malformed_xml() {
        let xml = b"<PingList><PingItem><Name>a</Status></PingItem></PingList>";
        assert!(PingResponse::from_xml(xml).is_err());
    }

    #[test]
    fn test_duplicate_name_keeps_last() {
        let response = PingResponse::new(vec![
            PingItem::new("a", PingStatus::Ok),
            PingItem::new("a", PingStatus::Error).with_text("flapping"),
        ]);

        let map = response.item_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map["a"].status, PingStatus::Error);
    }
}
