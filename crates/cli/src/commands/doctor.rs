use serde::Serialize;

use concierge_core::config::{AppConfig, LoadOptions};
use concierge_core::registry::{FileRegistryLoader, RegistryLoader};

use super::CommandResult;

#[derive(Clone, Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: &'static str,
    detail: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self { name, status: "pass", detail: detail.into() }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self { name, status: "fail", detail: detail.into() }
    }

    fn passed(&self) -> bool {
        self.status == "pass"
    }
}

pub fn run(json: bool) -> CommandResult {
    let checks = collect_checks();
    let all_passed = checks.iter().all(DoctorCheck::passed);

    let output = if json {
        serde_json::to_string_pretty(&checks).unwrap_or_else(|error| format!("{{\"error\": \"{error}\"}}"))
    } else {
        let mut lines: Vec<String> = checks
            .iter()
            .map(|check| format!("[{}] {}: {}", check.status, check.name, check.detail))
            .collect();
        lines.push(if all_passed { "doctor: all checks passed".to_string() } else { "doctor: some checks failed".to_string() });
        lines.join("\n")
    };

    CommandResult { exit_code: u8::from(!all_passed), output }
}

fn collect_checks() -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config", "configuration loaded and validated"));
            config
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config", error.to_string()));
            return checks;
        }
    };

    let loader = FileRegistryLoader::new(&config.registry.dir);
    match loader.load("doctor-probe") {
        Ok(registry) => {
            let enabled = registry.enabled().count();
            checks.push(DoctorCheck::pass(
                "registry",
                format!("default registry loaded, {} actions ({enabled} enabled)", registry.actions.len()),
            ));
        }
        Err(error) => checks.push(DoctorCheck::fail("registry", error.to_string())),
    }

    if config.tenants.dir.is_dir() {
        let profiles = std::fs::read_dir(&config.tenants.dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|entry| {
                        entry.path().extension().map(|ext| ext == "toml").unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0);
        checks.push(DoctorCheck::pass("tenants", format!("{profiles} tenant profile(s) found")));
    } else {
        checks.push(DoctorCheck::fail(
            "tenants",
            format!("tenants dir `{}` does not exist", config.tenants.dir.display()),
        ));
    }

    if config.providers.is_empty() {
        checks.push(DoctorCheck::pass(
            "providers",
            "no model backends configured; deterministic decider will answer every turn",
        ));
    } else {
        checks.push(DoctorCheck::pass(
            "providers",
            format!("{} backend(s) configured in failover order", config.providers.len()),
        ));
    }

    checks
}
