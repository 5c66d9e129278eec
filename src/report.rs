//! Report and alert rendering
//!
//! Turns windowed statistics into the text payloads delivered by `notify`.
//! Each consumer applies its own exclusion list here: reports hide
//! report-excluded kinds, alerts hide alert-excluded kinds; nothing is
//! filtered at measurement time.

use std::collections::HashMap;

use crate::classify::{ErrorKind, ErrorRegistry};
use crate::config::WebhookKind;
use crate::notify::{DiscordPayload, RenderedPayload, SlackPayload};
use crate::probe::LatencyStats;
use crate::window::{GlobalStatistic, WindowReport};

/// Identity and presentation knobs shared by all renderings of one cluster.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub cluster: &'a str,
    pub hostname: &'a str,
    pub memo: &'a str,
    pub hide_keywords: &'a [String],
}

/// `min/mean/max/stddev` cell; a degenerate stddev renders as NaN.
fn latency_cell(stats: &LatencyStats) -> String {
    if stats.stddev <= 0.0 {
        format!(" {}/{:3.0}/{}/NaN ", stats.min, stats.mean, stats.max)
    } else {
        format!(
            " {}/{:3.0}/{}/{:3.0} ",
            stats.min, stats.mean, stats.max, stats.stddev
        )
    }
}

fn scrub(mut text: String, hide_keywords: &[String]) -> String {
    for keyword in hide_keywords {
        if !keyword.is_empty() {
            text = text.replace(keyword, "");
        }
    }
    text
}

/// One line per bucket that actually has data:
/// `( submitted, confirmed, loss, min/mean/max/stddev ms )`.
fn window_records(report: &WindowReport) -> String {
    let mut text = String::new();
    for stat in &report.filtered {
        if stat.count == 0 {
            continue;
        }
        text.push_str(&format!(
            "( {:3.0}, {:3.0}, {:3.1}%,{})\n",
            stat.submitted,
            stat.confirmed,
            stat.loss * 100.0,
            latency_cell(&stat.latency),
        ));
    }
    text
}

/// Error summary from the period-wide frequency map, with `exclusions`
/// hidden, unconfirmed transactions folded into one count and everything else
/// shown under its short label.
fn error_summary(
    frequency: &HashMap<String, u32>,
    registry: &ErrorRegistry,
    exclusions: &[ErrorKind],
    hide_keywords: &[String],
) -> String {
    if frequency.is_empty() {
        return String::new();
    }
    let mut unconfirmed = 0u32;
    let mut lines = Vec::new();
    for (raw, count) in frequency {
        let kind = registry.classify(raw);
        if registry.is_in_list(kind, exclusions) {
            continue;
        }
        if kind == ErrorKind::UnconfirmedTimeout {
            unconfirmed += count;
        } else {
            lines.push(format!("(count: {}) {}", count, registry.label(raw)));
        }
    }
    lines.sort();
    let mut text = lines.join("\n");
    if unconfirmed > 0 {
        text.push_str(&format!("\n(count: {unconfirmed}) txs couldn't be confirmed"));
    }
    if text.is_empty() {
        return String::new();
    }
    scrub(format!("Error List:\n{text}"), hide_keywords)
}

/// Periodic report: global summary header plus the per-minute table and the
/// period's error list.
pub fn render_report(
    channel: WebhookKind,
    ctx: &RenderContext<'_>,
    report: &WindowReport,
    global: &GlobalStatistic,
    registry: &ErrorRegistry,
) -> RenderedPayload {
    let header = format!(
        "total-submitted: {:3.0}, total-confirmed: {:3.0}, average-loss: {:3.1}%\nmemo: {}",
        global.submitted,
        global.confirmed,
        global.loss * 100.0,
        ctx.memo,
    );
    let description = "( Submitted, Confirmed, Loss, min/mean/max/stddev ms )";
    let records = window_records(report);
    let errors = error_summary(
        &report.error_frequency,
        registry,
        &registry.report_exclusions,
        ctx.hide_keywords,
    );
    let body = format!("{description}\n{records}\n{errors}");

    match channel {
        WebhookKind::Slack => RenderedPayload::Slack(
            SlackPayload::default()
                .section(header)
                .section(format!("```{body}```")),
        ),
        WebhookKind::Discord => {
            RenderedPayload::Discord(DiscordPayload::new(format!("**{header}**\n```{body}```")))
        }
    }
}

/// Alert fired by the hysteresis trigger, carrying the threshold that must be
/// crossed next.
pub fn render_alert(
    channel: WebhookKind,
    ctx: &RenderContext<'_>,
    global: &GlobalStatistic,
    error_frequency: &HashMap<String, u32>,
    next_threshold: f64,
    registry: &ErrorRegistry,
) -> RenderedPayload {
    let errors = error_summary(
        error_frequency,
        registry,
        &registry.alert_exclusions,
        ctx.hide_keywords,
    );
    let text = format!(
        "{{ hostname: {}, cluster: {}, memo: {}, submitted: {:3.0}, confirmed: {:3.0}, loss: {:3.1}%, confirmation: min/mean/max/stddev ={}, next_threshold: {:3.0}%, error: {} }}",
        ctx.hostname,
        ctx.cluster,
        ctx.memo,
        global.submitted,
        global.confirmed,
        global.loss * 100.0,
        latency_cell(&global.latency),
        next_threshold,
        errors.replace('\n', " "),
    );

    match channel {
        WebhookKind::Slack => {
            RenderedPayload::Slack(SlackPayload::default().section(text))
        }
        WebhookKind::Discord => {
            RenderedPayload::Discord(DiscordPayload::new(format!("```{text}```")))
        }
    }
}

/// Notice emitted when the failover pool switches endpoints.
pub fn render_failover(
    channel: WebhookKind,
    hostname: &str,
    cluster: &str,
    url: &str,
) -> RenderedPayload {
    let text =
        format!("{{ hostname: {hostname}, cluster: {cluster}, msg: failover to {url} }}");
    match channel {
        WebhookKind::Slack => {
            RenderedPayload::Slack(SlackPayload::default().section(text))
        }
        WebhookKind::Discord => {
            RenderedPayload::Discord(DiscordPayload::new(format!("```{text}```")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frequency(entries: &[(&str, u32)]) -> HashMap<String, u32> {
        entries
            .iter()
            .map(|(raw, count)| (raw.to_string(), *count))
            .collect()
    }

    #[test]
    fn latency_cell_degenerate_stddev() {
        let stats = LatencyStats {
            min: 10,
            mean: 20.0,
            max: 30,
            stddev: 0.0,
            sum: 60,
        };
        assert!(latency_cell(&stats).ends_with("/NaN "));
    }

    #[test]
    fn error_summary_applies_exclusions_and_labels() {
        let registry = ErrorRegistry::new();
        let freq = frequency(&[
            ("Transaction simulation failed: Blockhash not found", 4),
            ("connection refused", 2),
            ("transaction unconfirmed: blockhash expired", 3),
        ]);
        let text = error_summary(&freq, &registry, &registry.alert_exclusions, &[]);
        assert!(!text.contains("Blockhash not found"));
        assert!(text.contains("(count: 2) connection-refused"));
        assert!(text.contains("(count: 3) txs couldn't be confirmed"));
    }

    #[test]
    fn error_summary_scrubs_hide_keywords() {
        let registry = ErrorRegistry::new();
        let freq = frequency(&[("failure at https://secret.example.org", 1)]);
        let hide = vec!["secret.example.org".to_string()];
        let text = error_summary(&freq, &registry, &registry.report_exclusions, &hide);
        assert!(!text.contains("secret.example.org"));
        assert!(text.contains("failure at"));
    }

    #[test]
    fn all_excluded_errors_render_nothing() {
        let registry = ErrorRegistry::new();
        let freq = frequency(&[("Transaction simulation failed: Blockhash not found", 9)]);
        assert_eq!(
            error_summary(&freq, &registry, &registry.report_exclusions, &[]),
            ""
        );
    }

    #[test]
    fn alert_payload_carries_next_threshold() {
        let registry = ErrorRegistry::new();
        let ctx = RenderContext {
            cluster: "devnet",
            hostname: "test-host",
            memo: "",
            hide_keywords: &[],
        };
        let global = GlobalStatistic {
            submitted: 30.0,
            confirmed: 20.0,
            loss: 1.0 / 3.0,
            count: 3,
            latency: LatencyStats::default(),
        };
        let payload = render_alert(
            WebhookKind::Discord,
            &ctx,
            &global,
            &HashMap::new(),
            50.0,
            &registry,
        );
        match payload {
            RenderedPayload::Discord(p) => {
                assert!(p.content.contains("next_threshold:  50%"));
                assert!(p.content.contains("loss: 33.3%"));
            }
            _ => panic!("expected discord payload"),
        }
    }
}
