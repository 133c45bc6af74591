use tandem_core::config::{AppConfig, StoreBackend};
use tandem_store::SqliteOrderStore;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub fn run_doctor(config: &AppConfig) {
    let checks = vec![
        check_model(config),
        check_store(config),
        check_engine(config),
        check_shop(config),
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn check_model(config: &AppConfig) -> CheckResult {
    let Some(model) = &config.model else {
        return CheckResult {
            label: "Model".into(),
            ok: true,
            detail: "Not configured (order summaries are generated locally)".into(),
        };
    };

    let has_key = model
        .api_key
        .as_ref()
        .is_some_and(|k| !k.is_empty() && !k.starts_with("${"));
    let needs_key = !matches!(model.provider.as_str(), "ollama" | "vllm");

    if let Err(e) = tandem_llm::create_client(model) {
        CheckResult {
            label: "Model".into(),
            ok: false,
            detail: e.to_string(),
        }
    } else if needs_key && !has_key {
        CheckResult {
            label: "Model".into(),
            ok: false,
            detail: format!("No API key set for provider '{}'", model.provider),
        }
    } else {
        CheckResult {
            label: "Model".into(),
            ok: true,
            detail: format!("{} ({})", model.model_id, model.provider),
        }
    }
}

fn check_store(config: &AppConfig) -> CheckResult {
    match config.store.backend {
        StoreBackend::Memory => CheckResult {
            label: "Order store".into(),
            ok: true,
            detail: "In memory (orders are lost on exit)".into(),
        },
        StoreBackend::Sqlite => {
            let path = config.store.resolved_path();
            match SqliteOrderStore::open(&path) {
                Ok(_) => CheckResult {
                    label: "Order store".into(),
                    ok: true,
                    detail: format!("{}", path.display()),
                },
                Err(e) => CheckResult {
                    label: "Order store".into(),
                    ok: false,
                    detail: format!("{}: {}", path.display(), e),
                },
            }
        }
    }
}

fn check_engine(config: &AppConfig) -> CheckResult {
    let engine = &config.engine;
    if engine.tool_timeout_secs == 0 {
        return CheckResult {
            label: "Engine".into(),
            ok: false,
            detail: "tool_timeout_secs is 0; every tool call would time out".into(),
        };
    }
    let limit = match engine.max_parallel {
        0 => "unbounded".to_string(),
        n => n.to_string(),
    };
    CheckResult {
        label: "Engine".into(),
        ok: true,
        detail: format!(
            "fan-out {:?}, merge {:?}, parallel limit {}",
            engine.fan_out, engine.merge, limit
        ),
    }
}

fn check_shop(config: &AppConfig) -> CheckResult {
    let shop = &config.shop;
    let known = ["standard", "express", "international"];
    if !known.contains(&shop.default_shipping_type.to_lowercase().as_str()) {
        return CheckResult {
            label: "Shop".into(),
            ok: false,
            detail: format!(
                "default_shipping_type '{}' is not a known rate (charged as standard)",
                shop.default_shipping_type
            ),
        };
    }
    CheckResult {
        label: "Shop".into(),
        ok: true,
        detail: format!(
            "free shipping from ${:.2}, reorder below {}, broad search rate {}",
            shop.free_shipping_threshold, shop.reorder_threshold, shop.search_broad_rate
        ),
    }
}
