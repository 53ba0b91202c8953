//! Keyword retrieval over a built-in knowledge base.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{AugmentedContext, BackendError, ContextAugmenter};

const SQL_TERMS: &[&str] = &["mysql", "sql", "database", "query"];
const METRICS_TERMS: &[&str] = &["prometheus", "metrics", "monitoring", "cpu", "memory"];
const LOG_TERMS: &[&str] = &["logs", "logging", "nginx", "error log"];
const APM_TERMS: &[&str] = &["api", "latency", "performance", "error rate"];

fn mentions_any(prompt: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| prompt.contains(term))
}

/// Reference material the augmenter can quote.
struct KnowledgeBase {
    prometheus: Value,
    mysql: Value,
    postgres: Value,
    nginx_logs: Value,
    application_logs: Value,
    system_monitoring: Value,
    application_performance: Value,
    database_monitoring: Value,
}

impl KnowledgeBase {
    fn builtin() -> Self {
        Self {
            prometheus: json!({
                "cpu_usage": "rate(node_cpu_seconds_total{mode=\"idle\"}[5m])",
                "memory_usage": "node_memory_MemTotal_bytes - node_memory_MemFree_bytes",
                "disk_usage": "node_filesystem_avail_bytes{mountpoint=\"/\"} / node_filesystem_size_bytes{mountpoint=\"/\"} * 100"
            }),
            mysql: json!({
                "query_rate": "SELECT COUNT(*) as query_count, DATE_FORMAT(event_time, '%Y-%m-%d %H:%i:%s') as time FROM mysql_query_log GROUP BY time",
                "slow_queries": "SELECT query_text, execution_time FROM mysql_slow_log WHERE execution_time > 1.0 ORDER BY execution_time DESC",
                "connection_count": "SELECT COUNT(*) as connections FROM information_schema.processlist"
            }),
            postgres: json!({
                "active_connections": "SELECT count(*) FROM pg_stat_activity WHERE state = 'active'",
                "database_size": "SELECT pg_database_size(current_database())",
                "index_usage": "SELECT relname, idx_scan, seq_scan FROM pg_stat_user_tables ORDER BY idx_scan DESC"
            }),
            nginx_logs: json!({
                "access_log": "timestamp: datetime, remote_addr: ip, request: string, status: integer, bytes_sent: integer, http_referer: string, http_user_agent: string",
                "error_log": "timestamp: datetime, level: string, pid: integer, message: string"
            }),
            application_logs: json!({
                "json_logs": "timestamp: datetime, level: string, service: string, trace_id: string, message: string, context: object"
            }),
            system_monitoring: json!({
                "description": "Dashboard with CPU, memory, disk, and network metrics for system monitoring",
                "panels": ["CPU Usage", "Memory Usage", "Disk I/O", "Network Traffic"]
            }),
            application_performance: json!({
                "description": "Dashboard for tracking API performance including request rate, latency, and error rate",
                "panels": ["Request Rate", "P95 Latency", "Error Rate", "Dependency Health"]
            }),
            database_monitoring: json!({
                "description": "Dashboard for monitoring database performance and health",
                "panels": ["Query Rate", "Slow Queries", "Connection Count", "Cache Hit Ratio"]
            }),
        }
    }
}

/// Context augmenter matching prompt keywords against reference snippets.
pub struct KeywordAugmenter {
    knowledge: KnowledgeBase,
}

impl Default for KeywordAugmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordAugmenter {
    pub fn new() -> Self {
        Self {
            knowledge: KnowledgeBase::builtin(),
        }
    }

    pub fn lookup(&self, prompt: &str) -> AugmentedContext {
        let prompt = prompt.to_lowercase();
        let kb = &self.knowledge;
        let mut context = AugmentedContext::default();

        if mentions_any(&prompt, SQL_TERMS) {
            let examples = if !prompt.contains("mysql") && prompt.contains("postgres") {
                &kb.postgres
            } else {
                &kb.mysql
            };
            context.push("sql_examples", examples.clone());
        }

        if mentions_any(&prompt, METRICS_TERMS) {
            context.push("metrics_examples", kb.prometheus.clone());
            context.push("system_dashboard_example", kb.system_monitoring.clone());
        }

        if mentions_any(&prompt, LOG_TERMS) {
            let formats = if !prompt.contains("nginx")
                && (prompt.contains("application") || prompt.contains("json"))
            {
                &kb.application_logs
            } else {
                &kb.nginx_logs
            };
            context.push("log_formats", formats.clone());
        }

        if mentions_any(&prompt, APM_TERMS) {
            context.push(
                "application_dashboard_example",
                kb.application_performance.clone(),
            );
        }

        if context.is_empty() {
            context.push(
                "general_dashboard_examples",
                json!({
                    "system_monitoring": kb.system_monitoring,
                    "application_performance": kb.application_performance,
                    "database_monitoring": kb.database_monitoring
                }),
            );
        }

        context
    }
}

#[async_trait]
impl ContextAugmenter for KeywordAugmenter {
    async fn augment(&self, prompt: &str) -> Result<AugmentedContext, BackendError> {
        let context = self.lookup(prompt);
        tracing::debug!(sections = context.sections.len(), "Retrieved prompt context");
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(context: &AugmentedContext) -> Vec<&str> {
        context.sections.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_metrics_prompt() {
        let context = KeywordAugmenter::new().lookup("Prometheus CPU and memory per node");
        assert_eq!(names(&context), vec!["metrics_examples", "system_dashboard_example"]);
    }

    #[test]
    fn test_postgres_prompt_picks_postgres_queries() {
        let context = KeywordAugmenter::new().lookup("Postgres database health");
        let sql = &context.sections[0];
        assert_eq!(sql.name, "sql_examples");
        assert!(sql.content.get("active_connections").is_some());

        let context = KeywordAugmenter::new().lookup("MySQL query latency");
        assert!(context.sections[0].content.get("slow_queries").is_some());
        assert!(names(&context).contains(&"application_dashboard_example"));
    }

    #[test]
    fn test_log_prompt_picks_format() {
        let context = KeywordAugmenter::new().lookup("application json logs by service");
        assert!(context.sections[0].content.get("json_logs").is_some());

        let context = KeywordAugmenter::new().lookup("nginx error log");
        assert!(context.sections[0].content.get("access_log").is_some());
    }

    #[tokio::test]
    async fn test_unmatched_prompt_falls_back_to_archetypes() {
        let context = KeywordAugmenter::new().augment("weather in Lisbon").await.unwrap();
        assert_eq!(names(&context), vec!["general_dashboard_examples"]);
        assert!(context.format_for_prompt().contains("### Database Monitoring"));
    }
}
