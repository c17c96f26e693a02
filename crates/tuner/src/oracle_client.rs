//! HTTP client for the proposer/oracle service

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use tuner_lib::insights::{Insight, InsightDecision, InsightProperty, ADD_CONFIDENCE};
use tuner_lib::oracle::{
    ChildProposal, CorrectionContext, ExpansionContext, LivePatchContext, Oracle, Proposer,
    ReconfigContext, Selection,
};
use tuner_lib::search::NodeDigest;
use tuner_lib::TuneError;
use url::Url;

/// Proposer and oracle backed by JSON POST endpoints under one base URL
pub struct HttpOracle {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct ChildrenResponse {
    children: Vec<ChildProposal>,
}

#[derive(Debug, Deserialize)]
struct OptionsResponse {
    options: String,
}

#[derive(Debug, Deserialize)]
struct PatchResponse {
    patch: String,
}

#[derive(Debug, Serialize)]
struct SelectRequest {
    tree: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RecordsRequest<'a> {
    records: &'a [NodeDigest],
}

#[derive(Debug, Deserialize)]
struct CollectedInsight {
    content: String,
    property: InsightProperty,
}

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    insights: Vec<CollectedInsight>,
}

#[derive(Debug, Serialize)]
struct ReflectRequest<'a> {
    records: &'a [NodeDigest],
    insights: &'a [Insight],
}

#[derive(Debug, Deserialize)]
struct ReflectResponse {
    decisions: Vec<InsightDecision>,
}

impl HttpOracle {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid oracle URL")?;

        Ok(Self { client, base_url })
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        debug!(url = %url, "Calling oracle");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Oracle error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }
}

fn oracle_error(endpoint: &str, e: anyhow::Error) -> TuneError {
    TuneError::Oracle(format!("{endpoint}: {e:#}"))
}

#[async_trait]
impl Proposer for HttpOracle {
    async fn propose_children(&self, ctx: &ExpansionContext) -> tuner_lib::Result<Vec<ChildProposal>> {
        let response: ChildrenResponse = self
            .post("propose_children", ctx)
            .await
            .map_err(|e| oracle_error("propose_children", e))?;
        Ok(response.children)
    }

    async fn propose_full_reconfig(&self, ctx: &ReconfigContext) -> tuner_lib::Result<String> {
        let response: OptionsResponse = self
            .post("full_reconfig", ctx)
            .await
            .map_err(|e| oracle_error("full_reconfig", e))?;
        Ok(response.options)
    }

    async fn propose_live_patch(&self, ctx: &LivePatchContext) -> tuner_lib::Result<String> {
        let response: PatchResponse = self
            .post("live_patch", ctx)
            .await
            .map_err(|e| oracle_error("live_patch", e))?;
        Ok(response.patch)
    }

    async fn correct_config(&self, ctx: &CorrectionContext) -> tuner_lib::Result<ChildProposal> {
        self.post("correct_config", ctx)
            .await
            .map_err(|e| oracle_error("correct_config", e))
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn select_next(&self, tree_json: &str) -> tuner_lib::Result<Selection> {
        let request = SelectRequest {
            tree: serde_json::from_str(tree_json)?,
        };
        self.post("select_next", &request)
            .await
            .map_err(|e| oracle_error("select_next", e))
    }

    async fn collect_insights(&self, records: &[NodeDigest]) -> tuner_lib::Result<Vec<Insight>> {
        let response: InsightsResponse = self
            .post("collect_insights", &RecordsRequest { records })
            .await
            .map_err(|e| oracle_error("collect_insights", e))?;

        // Ids are assigned by the memory the insights are added to
        Ok(response
            .insights
            .into_iter()
            .map(|i| Insight {
                id: 0,
                content: i.content,
                property: i.property,
                confidence: ADD_CONFIDENCE,
            })
            .collect())
    }

    async fn reflect(&self, records: &[NodeDigest], insights: &[Insight]) -> tuner_lib::Result<Vec<InsightDecision>> {
        let response: ReflectResponse = self
            .post("reflect", &ReflectRequest { records, insights })
            .await
            .map_err(|e| oracle_error("reflect", e))?;
        Ok(response.decisions)
    }
}
