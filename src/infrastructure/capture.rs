//! Readers for recorded traffic and DOM snapshots.
//!
//! Captures are JSON lines, one exchange per line. DOM snapshots are a
//! JSON array of the links the host UI rendered in its list.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::application::{DomDriver, InterceptStats, Interceptor, Notifier};
use crate::domain::{AppError, DomItem, RawExchange, Result};

/// Reads every exchange from a capture file, skipping unreadable lines.
///
/// # Errors
/// Returns error if the file does not exist or cannot be read.
pub fn read_capture(path: &Path) -> Result<Vec<RawExchange>> {
    let content = read_file(path)?;
    let mut exchanges = Vec::new();

    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawExchange>(line) {
            Ok(exchange) => exchanges.push(exchange),
            Err(e) => {
                tracing::warn!(line = number + 1, "Skipping unreadable capture line: {}", e);
            }
        }
    }

    tracing::debug!(count = exchanges.len(), path = %path.display(), "Capture loaded");
    Ok(exchanges)
}

#[derive(Debug, Deserialize)]
struct DomLink {
    href: String,
    #[serde(default)]
    title: String,
}

/// Reads a DOM snapshot. Links without an identifier are skipped.
///
/// # Errors
/// Returns error if the file cannot be read or is not a JSON array of links.
pub fn read_dom_snapshot(path: &Path) -> Result<Vec<DomItem>> {
    let content = read_file(path)?;
    let links: Vec<DomLink> = serde_json::from_str(&content).map_err(AppError::json_parse)?;

    Ok(links
        .into_iter()
        .filter_map(|link| {
            let item = DomItem::from_href(&link.href, link.title.trim());
            if item.is_none() {
                tracing::debug!(href = %link.href, "Link has no identifier");
            }
            item
        })
        .collect())
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(AppError::NotFound {
            path: path.to_path_buf(),
        });
    }
    fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read {}", path.display()), e))
}

/// Replays recorded traffic as if the host UI were scrolling its list.
///
/// Each exchange goes through the interceptor before the DOM snapshot is
/// reported, mirroring the listing requests a real walk triggers.
pub struct ReplayDomDriver<'a, N: Notifier> {
    interceptor: &'a mut Interceptor<N>,
    exchanges: Vec<RawExchange>,
    dom: Vec<DomItem>,
    stats: InterceptStats,
}

impl<'a, N: Notifier> ReplayDomDriver<'a, N> {
    pub fn new(
        interceptor: &'a mut Interceptor<N>,
        exchanges: Vec<RawExchange>,
        dom: Vec<DomItem>,
    ) -> Self {
        Self {
            interceptor,
            exchanges,
            dom,
            stats: InterceptStats::default(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> InterceptStats {
        self.stats
    }
}

impl<N: Notifier> DomDriver for ReplayDomDriver<'_, N> {
    fn drive(&mut self) -> Result<Vec<DomItem>> {
        for exchange in self.exchanges.drain(..) {
            let observation = self.interceptor.observe(&exchange);
            self.stats.record(observation);
        }
        Ok(std::mem::take(&mut self.dom))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::channel;
    use crate::application::interceptor::SilentNotifier;
    use crate::domain::RecordKind;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_read_capture_skips_bad_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"method":"GET","url":"https://h/_/library/list","status":200,"response_body":"[[]]"}"#,
                "\n\nnot json\n",
                r#"{"method":"POST","url":"https://h/_/prompts/delete","status":200,"request_body":["prompts/p1"]}"#,
                "\n"
            ),
        )
        .unwrap();

        let exchanges = read_capture(&path).unwrap();
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[1].method, "POST");
    }

    #[test]
    fn test_missing_capture_is_not_found() {
        let dir = tempdir().unwrap();
        let err = read_capture(&dir.path().join("nope.jsonl")).unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn test_read_dom_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dom.json");
        fs::write(
            &path,
            r##"[{"href":"/app/abc","title":"  First "},{"href":"#"},{"href":"/app/def?x=1","title":"Second"}]"##,
        )
        .unwrap();

        let items = read_dom_snapshot(&path).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First");
        assert_eq!(items[1].id, "def");
    }

    #[test]
    fn test_replay_driver_publishes_through_interceptor() {
        let (bridge, mut listener) = channel();
        listener.subscribe(RecordKind::LibraryItem);
        let mut interceptor = Interceptor::new(bridge, SilentNotifier, Duration::from_secs(1));

        let exchange: RawExchange = serde_json::from_str(
            r#"{"method":"GET","url":"https://h/_/library/list","status":200,"response_body":[[["items/a","A"]]]}"#,
        )
        .unwrap();
        let dom = vec![DomItem {
            id: "a".into(),
            title: "A".into(),
        }];

        let mut driver = ReplayDomDriver::new(&mut interceptor, vec![exchange], dom);
        let rendered = driver.drive().unwrap();
        assert_eq!(rendered.len(), 1);
        assert_eq!(driver.stats().published, 1);
        assert_eq!(listener.drain(|_| {}), 1);
    }
}
