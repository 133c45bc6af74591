use tandem_core::error::Result;
use tandem_core::state::StateMap;
use tandem_core::types::Payload;

use super::{text_as, Workflows};
use crate::router::Router;
use crate::step::Step;

impl Workflows<'_> {
    /// Product search, split between exact phrase and any-word matching.
    ///
    /// Input: the query text, or `{query}`.
    pub fn search(&self) -> Result<Step> {
        let exact = self.tool("search_products")?.named("search_exact").with_args(query_args);
        let broad = self
            .tool("search_products_broad")?
            .named("search_broad")
            .with_args(query_args);
        let router = Router::weighted(
            "search_router",
            self.config.shop.search_broad_rate,
            Step::leaf(exact),
            Step::leaf(broad),
        )?;
        Ok(router.into())
    }
}

fn query_args(input: &Payload, _state: &StateMap) -> Result<serde_json::Value> {
    Ok(text_as("query", input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use crate::workflows::fixtures::shop;
    use serde_json::json;
    use tandem_core::error::ErrorKind;

    fn ids(payload: &Payload) -> Vec<String> {
        payload
            .as_data()
            .and_then(|v| v.as_array())
            .map(|hits| hits.iter().filter_map(|h| h["id"].as_str().map(String::from)).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_rate_selects_matcher() {
        let mut shop = shop();
        let session = SessionManager::new().start();

        shop.config.shop.search_broad_rate = 0.0;
        let exact = Workflows::new(&shop.tools, &shop.config).search().unwrap();
        let outcome = shop.runner.run(&exact, &session, "wireless mouse").await;
        assert_eq!(outcome.events[0].author(), "search_exact");
        assert_eq!(ids(outcome.last_payload().unwrap()), vec!["P007"]);

        shop.config.shop.search_broad_rate = 1.0;
        let broad = Workflows::new(&shop.tools, &shop.config).search().unwrap();
        let outcome = shop.runner.run(&broad, &session, json!({"query": "wireless mouse"})).await;
        assert_eq!(outcome.events[0].author(), "search_broad");
        assert_eq!(ids(outcome.last_payload().unwrap()), vec!["P001", "P007"]);
    }

    #[test]
    fn test_bad_rate_rejected() {
        let mut shop = shop();
        shop.config.shop.search_broad_rate = 2.0;
        let err = Workflows::new(&shop.tools, &shop.config).search().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
