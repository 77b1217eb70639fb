// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use crate::app::errors::{AppResult, local_error};
use crate::app::services::dependencies::{Dependency, PackageRegistry, discover_dependencies};
use crate::app::services::scripts::{
    render_bootstrap, render_entrypoint_script, render_prebuilt_bootstrap,
};
use crate::app::services::submit_file::{
    SubmitDescriptor, render_submit_descriptor, validate_environment,
};
use crate::app::types::{Payload, ResourceProfile, UnitOfWork};

pub const SUBMIT_FILE: &str = "main.sub";
pub const BOOTSTRAP_FILE: &str = "main.sh";
pub const ENTRY_SCRIPT_FILE: &str = "main.py";
pub const PREBUILT_FILE: &str = "payload";
pub const INPUT_FILE: &str = "input.json";

/// How the entry artifact reaches the work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryArtifact {
    /// Rendered text uploaded as `main.py`.
    Script(String),
    /// Local file uploaded as-is to `payload`.
    Prebuilt(PathBuf),
}

impl EntryArtifact {
    pub fn remote_name(&self) -> &'static str {
        match self {
            EntryArtifact::Script(_) => ENTRY_SCRIPT_FILE,
            EntryArtifact::Prebuilt(_) => PREBUILT_FILE,
        }
    }
}

/// Everything uploaded to the work directory for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBundle {
    pub submit: SubmitDescriptor,
    pub bootstrap: String,
    pub entry: EntryArtifact,
    pub input_json: String,
    pub dependencies: Vec<Dependency>,
}

impl JobBundle {
    /// Remote file names in upload order.
    pub fn file_names(&self) -> [&'static str; 4] {
        [
            SUBMIT_FILE,
            BOOTSTRAP_FILE,
            self.entry.remote_name(),
            INPUT_FILE,
        ]
    }
}

/// Pure rendering of a unit of work; no remote I/O happens here.
#[derive(Debug, Clone, Default)]
pub struct JobPackager {
    registry: PackageRegistry,
    prelude: Vec<String>,
}

impl JobPackager {
    pub fn new(registry: PackageRegistry, prelude: Vec<String>) -> Self {
        Self { registry, prelude }
    }

    pub fn package(&self, unit: &UnitOfWork, profile: &ResourceProfile) -> AppResult<JobBundle> {
        validate_environment(&profile.environment)?;
        let input_json = serde_json::to_string(&unit.packaged_input())
            .map_err(|err| local_error(format!("failed to serialize input document: {err}")))?;

        let (bootstrap, entry, dependencies) = match &unit.payload {
            Payload::Script { source, entrypoint } => {
                let dependencies = discover_dependencies(source, &self.registry);
                let script =
                    render_entrypoint_script(source, entrypoint, INPUT_FILE, &self.prelude)?;
                (
                    render_bootstrap(&dependencies, ENTRY_SCRIPT_FILE),
                    EntryArtifact::Script(script),
                    dependencies,
                )
            }
            Payload::Prebuilt { local_path } => (
                render_prebuilt_bootstrap(PREBUILT_FILE, INPUT_FILE),
                EntryArtifact::Prebuilt(local_path.clone()),
                Vec::new(),
            ),
        };
        let submit = render_submit_descriptor(
            profile,
            BOOTSTRAP_FILE,
            &[entry.remote_name(), INPUT_FILE],
        );
        tracing::debug!(
            entry = entry.remote_name(),
            dependencies = dependencies.len(),
            "packaged unit of work"
        );

        Ok(JobBundle {
            submit,
            bootstrap,
            entry,
            input_json,
            dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::ErrorKind;
    use serde_json::{Map, Value, json};

    fn unit(payload: Payload) -> UnitOfWork {
        let mut input = Map::new();
        input.insert("params".into(), json!({"class_name": "Collisions24"}));
        UnitOfWork {
            payload,
            input_document: input,
            results_path: "/eos/dc3/results/jobs/42".into(),
            input_wrapper: Some("job".into()),
        }
    }

    #[test]
    fn script_payload_produces_four_artifacts() {
        let registry: PackageRegistry = [("numpy".to_string(), "1.26.4".to_string())]
            .into_iter()
            .collect();
        let packager = JobPackager::new(registry, Vec::new());
        let bundle = packager
            .package(
                &unit(Payload::Script {
                    source: "import numpy\n\ndef run_json_production(job):\n    pass\n".into(),
                    entrypoint: "run_json_production".into(),
                }),
                &ResourceProfile::default(),
            )
            .unwrap();

        assert_eq!(
            bundle.file_names(),
            ["main.sub", "main.sh", "main.py", "input.json"]
        );
        assert!(bundle.bootstrap.contains("pip install numpy==1.26.4"));
        let EntryArtifact::Script(script) = &bundle.entry else {
            panic!("expected script artifact");
        };
        assert!(script.contains("run_json_production(**input_data)"));
        assert_eq!(
            bundle
                .submit
                .get("transfer_input_files")
                .and_then(|d| d.value.as_deref()),
            Some("main.py, input.json")
        );
        let input: Value = serde_json::from_str(&bundle.input_json).unwrap();
        assert_eq!(input["job"]["results_dir"], "/eos/dc3/results/jobs/42");
    }

    #[test]
    fn prebuilt_payload_ships_binary() {
        let packager = JobPackager::default();
        let bundle = packager
            .package(
                &unit(Payload::Prebuilt {
                    local_path: PathBuf::from("target/release/producer"),
                }),
                &ResourceProfile::default(),
            )
            .unwrap();
        assert_eq!(
            bundle.file_names(),
            ["main.sub", "main.sh", "payload", "input.json"]
        );
        assert_eq!(
            bundle.entry,
            EntryArtifact::Prebuilt(PathBuf::from("target/release/producer"))
        );
        assert!(bundle.dependencies.is_empty());
        assert!(bundle.bootstrap.contains("./payload input.json"));
    }

    #[test]
    fn missing_entrypoint_is_rejected() {
        let err = JobPackager::default()
            .package(
                &unit(Payload::Script {
                    source: "x = 1".into(),
                    entrypoint: String::new(),
                }),
                &ResourceProfile::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn environment_with_spaces_is_rejected_before_rendering() {
        let profile = ResourceProfile {
            environment: vec![("SSO_CLIENT_SECRET".into(), "a b".into())],
            ..ResourceProfile::default()
        };
        let err = JobPackager::default()
            .package(
                &unit(Payload::Prebuilt {
                    local_path: PathBuf::from("target/release/producer"),
                }),
                &profile,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("SSO_CLIENT_SECRET"));
    }
}
