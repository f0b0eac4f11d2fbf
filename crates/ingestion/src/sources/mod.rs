//! Publisher source adapters
//!
//! Each adapter pulls a raw batch from one upstream API through its
//! credential pool and normalizes every item into the canonical
//! article shape. Raw shapes never leave this module.

pub mod headline_feed;
pub mod top_stories;

pub use headline_feed::HeadlineFeedSource;
pub use top_stories::TopStoriesSource;

use async_trait::async_trait;
use newsforge_common::errors::Result;
use newsforge_common::models::{Article, Section};
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait PublisherSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pull the latest batch for a section, normalized
    async fn fetch_section(&self, section: Section) -> Result<Vec<Article>>;
}

/// Static section-to-source routing
pub struct SourceRouter {
    routes: HashMap<Section, Arc<dyn PublisherSource>>,
}

impl SourceRouter {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Default map: finance rides the headline feed, every other
    /// section the top-stories API
    pub fn with_default_routing(
        top_stories: Arc<dyn PublisherSource>,
        headline_feed: Arc<dyn PublisherSource>,
    ) -> Self {
        let mut router = Self::new();
        for section in Section::ALL {
            let source = if section == Section::Finance {
                Arc::clone(&headline_feed)
            } else {
                Arc::clone(&top_stories)
            };
            router.routes.insert(section, source);
        }
        router
    }

    pub fn insert(&mut self, section: Section, source: Arc<dyn PublisherSource>) {
        self.routes.insert(section, source);
    }

    pub fn source_for(&self, section: Section) -> Option<Arc<dyn PublisherSource>> {
        self.routes.get(&section).cloned()
    }
}

impl Default for SourceRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl PublisherSource for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn fetch_section(&self, _section: Section) -> Result<Vec<Article>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn default_routing_covers_every_section() {
        let router = SourceRouter::with_default_routing(
            Arc::new(Named("top-stories")),
            Arc::new(Named("headline-feed")),
        );
        for section in Section::ALL {
            let source = router.source_for(section).expect("route");
            if section == Section::Finance {
                assert_eq!(source.name(), "headline-feed");
            } else {
                assert_eq!(source.name(), "top-stories");
            }
        }
    }
}
