// =============================================================================
// Chat-webhook notifier — open/adjust/close events only, never per-tick noise
// =============================================================================
//
// Models the single outbound interface named in spec section 6: a structured
// "post" message (`msg_type=post`, `content.post.zh_cn.{title,content}`,
// content being a list of paragraphs, each paragraph a list of runs). A send
// failure is logged and swallowed: a notification is a courtesy, never a
// reason to interrupt the orchestrator.
// =============================================================================

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{instrument, warn};

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub webhook_url: String,
}

#[derive(Serialize)]
struct Run {
    tag: &'static str,
    text: String,
}

#[derive(Serialize)]
struct ZhCn {
    title: String,
    content: Vec<Vec<Run>>,
}

#[derive(Serialize)]
struct PostContent {
    zh_cn: ZhCn,
}

#[derive(Serialize)]
struct PostBody {
    post: PostContent,
}

#[derive(Serialize)]
struct WebhookPayload {
    msg_type: &'static str,
    content: PostBody,
}

fn paragraphs(lines: &[String]) -> Vec<Vec<Run>> {
    lines
        .iter()
        .map(|line| vec![Run { tag: "text", text: line.clone() }])
        .collect()
}

/// Chat webhook used for open/adjust/close events. Disabled in config means
/// every call below is a no-op.
pub struct Notifier {
    config: NotifierConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        let client = reqwest::Client::builder().build().expect("failed to build reqwest client");
        Self { config, client }
    }

    #[instrument(skip(self, title, lines))]
    async fn send(&self, title: String, lines: Vec<String>) {
        if !self.config.enabled {
            return;
        }
        if let Err(e) = self.post(title, lines).await {
            warn!(error = %e, "notifier webhook call failed");
        }
    }

    async fn post(&self, title: String, lines: Vec<String>) -> Result<()> {
        let payload = WebhookPayload {
            msg_type: "post",
            content: PostBody { post: PostContent { zh_cn: ZhCn { title, content: paragraphs(&lines) } } },
        };
        let resp = self
            .client
            .post(&self.config.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("notifier webhook request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("notifier webhook returned status {}", resp.status());
        }
        Ok(())
    }

    pub async fn notify_open(&self, symbol: &str, pos_side: crate::types::PosSide, size: f64, price: f64) {
        self.send(
            format!("Opened {symbol} {pos_side}"),
            vec![format!("size {size:.4} @ {price:.4}")],
        )
        .await;
    }

    pub async fn notify_adjust(&self, symbol: &str, pos_side: crate::types::PosSide, tp_layers: usize, sl_layers: usize) {
        self.send(
            format!("Adjusted stops {symbol} {pos_side}"),
            vec![format!("{tp_layers} take-profit layer(s), {sl_layers} stop-loss layer(s)")],
        )
        .await;
    }

    pub async fn notify_close(&self, symbol: &str, pos_side: crate::types::PosSide, realized_pnl: f64, hold_minutes: f64) {
        self.send(
            format!("Closed {symbol} {pos_side}"),
            vec![format!("pnl {realized_pnl:.4}, held {hold_minutes:.1} min")],
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_wraps_each_line_as_one_run() {
        let lines = vec!["a".to_string(), "b".to_string()];
        let p = paragraphs(&lines);
        assert_eq!(p.len(), 2);
        assert_eq!(p[0][0].text, "a");
    }

    #[tokio::test]
    async fn disabled_notifier_never_calls_out() {
        let notifier = Notifier::new(NotifierConfig { enabled: false, webhook_url: "http://127.0.0.1:1/unreachable".to_string() });
        notifier.notify_open("BTC-USDT-SWAP", crate::types::PosSide::Long, 1.0, 100.0).await;
    }
}
