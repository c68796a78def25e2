//! Eva Memory CLI
//!
//! `eva-memory <command> [json-args]` writes one JSON object to stdout per
//! invocation. Warnings go to stderr with the `[eva-memory WARN]` prefix.
//! Exit 0 on normal completion, even when the payload describes an error;
//! exit 1 only for usage errors and unparseable argument JSON.

use clap::Parser;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use eva_memory::config::Config;
use eva_memory::graph::{PageArgs, RecallFilter};
use eva_memory::orchestrator::Orchestrator;
use eva_memory::session::{SessionManager, SyncStartArgs};
use eva_memory::types::{MemoryPatch, RememberInput};

#[derive(Parser)]
#[command(name = "eva-memory")]
#[command(about = "Three-layer agent memory orchestrator")]
#[command(version)]
struct Cli {
    /// Command: remember, search, auto-recall, sync-start, sync-end,
    /// pre-compaction-flush, drain-queue, recall, forget, update, evolve,
    /// summarize, list, instructions, entities, maintain
    command: String,

    /// JSON object of arguments
    args: Option<String>,
}

fn warn_user(message: &str) {
    eprintln!("[eva-memory WARN] {}", message);
}

fn usage_error(message: &str) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

fn emit(value: Value) {
    println!("{}", value);
}

/// Map a handler result to the output payload; collaborator failures become
/// structured `{error}` objects instead of process failures.
fn payload<T: serde::Serialize>(result: eva_memory::Result<T>) -> Value {
    match result {
        Ok(value) => serde_json::to_value(value)
            .unwrap_or_else(|e| json!({ "error": format!("serialization failed: {}", e) })),
        Err(e) => {
            warn_user(&e.to_string());
            json!({ "error": e.to_string() })
        }
    }
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn opt_i64(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                e.exit()
            }
            _ => usage_error(&e.to_string()),
        },
    };

    let args: Value = match cli.args.as_deref() {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) => usage_error("arguments must be a JSON object"),
            Err(e) => usage_error(&format!("invalid JSON arguments: {}", e)),
        },
        None => json!({}),
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn_user(&e.to_string());
            emit(json!({ "error": e.to_string() }));
            return;
        }
    };

    let orch = match Orchestrator::bootstrap(config).await {
        Ok(orch) => orch,
        Err(e) => {
            warn_user(&e.to_string());
            emit(json!({ "error": e.to_string() }));
            return;
        }
    };

    let output = dispatch(&orch, &cli.command, args).await;
    emit(output);
}

async fn dispatch(orch: &Orchestrator, command: &str, args: Value) -> Value {
    match command {
        "remember" => {
            let input: RememberInput = match serde_json::from_value(args) {
                Ok(input) => input,
                Err(e) => return json!({ "error": format!("invalid arguments: {}", e) }),
            };
            payload(orch.remember(input).await)
        }

        "search" => {
            let Some(query) = opt_str(&args, "query") else {
                return json!({ "error": "query is required" });
            };
            let limit = opt_i64(&args, "limit").unwrap_or(10);
            let project = opt_str(&args, "project");
            let memory_type = opt_str(&args, "type");
            payload(
                orch.search(&query, limit, project.as_deref(), memory_type.as_deref())
                    .await,
            )
        }

        "auto-recall" => {
            let project = opt_str(&args, "project");
            let min_importance = opt_i64(&args, "minImportance").unwrap_or(3);
            let limit = opt_i64(&args, "limit").unwrap_or(5);
            let response = orch
                .searcher()
                .auto_recall(project.as_deref(), min_importance, limit)
                .await;
            payload(Ok(response))
        }

        "sync-start" => {
            let start: SyncStartArgs = match serde_json::from_value(args) {
                Ok(start) => start,
                Err(e) => return json!({ "error": format!("invalid arguments: {}", e) }),
            };
            payload(SessionManager::new(orch).sync_start(start).await)
        }

        "sync-end" => {
            let summary = opt_str(&args, "summary");
            payload(SessionManager::new(orch).sync_end(summary.as_deref()).await)
        }

        "pre-compaction-flush" => payload(SessionManager::new(orch).pre_compaction_flush().await),

        "drain-queue" => payload(
            orch.queue
                .drain(orch.embedder.as_ref(), orch.vector.as_ref(), &orch.state)
                .await,
        ),

        "recall" => {
            let filter = RecallFilter {
                id: opt_str(&args, "id"),
                memory_type: opt_str(&args, "type"),
                project: opt_str(&args, "project"),
                limit: opt_i64(&args, "limit").unwrap_or(10),
            };
            match orch.recall(filter).await {
                Ok(rows) => {
                    let count = rows.len();
                    json!({ "memories": rows, "count": count })
                }
                Err(e) => {
                    warn_user(&e.to_string());
                    json!({ "error": e.to_string() })
                }
            }
        }

        "forget" => {
            let id = opt_str(&args, "id");
            let query = opt_str(&args, "query");
            let reason = opt_str(&args, "reason");
            payload(
                orch.forget(id.as_deref(), query.as_deref(), reason.as_deref())
                    .await,
            )
        }

        "update" | "evolve" => {
            let Some(id) = opt_str(&args, "id") else {
                return json!({ "error": "id is required" });
            };
            let patch: MemoryPatch = match serde_json::from_value(args) {
                Ok(patch) => patch,
                Err(e) => return json!({ "error": format!("invalid arguments: {}", e) }),
            };
            payload(orch.update(&id, patch).await)
        }

        "summarize" => {
            let topic = opt_str(&args, "topic");
            let project = opt_str(&args, "project");
            let limit = opt_i64(&args, "limit").unwrap_or(50);
            payload(orch.summarize(topic.as_deref(), project.as_deref(), limit).await)
        }

        "list" => {
            let page_args = PageArgs {
                project: opt_str(&args, "project"),
                memory_type: opt_str(&args, "type"),
                sort_by: opt_str(&args, "sortBy"),
                sort_order: opt_str(&args, "sortOrder"),
                page: opt_i64(&args, "page").unwrap_or(1),
                page_size: opt_i64(&args, "pageSize").unwrap_or(20),
            };
            payload(orch.list(page_args).await)
        }

        "instructions" => {
            let project = opt_str(&args, "project");
            match &orch.graph {
                Some(graph) => match graph.get_instructions(project.as_deref()).await {
                    Ok(rows) => json!({ "instructions": rows }),
                    Err(e) => {
                        warn_user(&e.to_string());
                        json!({ "instructions": [] })
                    }
                },
                None => {
                    warn_user("graph store not connected");
                    json!({ "instructions": [] })
                }
            }
        }

        "entities" => {
            let limit = opt_i64(&args, "limit").unwrap_or(50);
            match &orch.graph {
                Some(graph) => match graph.list_entities(limit).await {
                    Ok(entities) => json!({ "entities": entities }),
                    Err(e) => {
                        warn_user(&e.to_string());
                        json!({ "entities": [] })
                    }
                },
                None => {
                    warn_user("graph store not connected");
                    json!({ "entities": [] })
                }
            }
        }

        "maintain" => {
            let max_age_days = opt_i64(&args, "maxAgeDays").unwrap_or(90);
            let min_importance = opt_i64(&args, "minImportance").unwrap_or(3);
            payload(orch.maintain(max_age_days, min_importance).await)
        }

        other => usage_error(&format!(
            "unknown command '{}'; run with --help for the command list",
            other
        )),
    }
}
