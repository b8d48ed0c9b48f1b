//! Conformance harness for the snapvm snapshot VM.
//!
//! Walks an artifacts directory (one sub-directory per test case, holding
//! `meta.yaml` and `snapshot.bin`), restores each snapshot, invokes the
//! fixture's exported function, and judges the captured output and
//! in-program assertions against the fixture. Failures are collected, not
//! fatal: every discovered case runs, and the process exits non-zero at
//! the end if any case failed.
//!
//! The engine build under test is whatever is wired into [`VmHost`]; this
//! tree binds the scripted reference engine, which exercises the identical
//! host protocol a production engine build would.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::error;

use snapvm_host::scripted::ScriptedEngine;
use snapvm_host::{hostfns, loader, Engine, ExecutionContext, RunReport, VmHost};

use fixture::Fixture;
use oracle::Judgment;

mod fixture;
mod oracle;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory containing one sub-directory per test case.
    #[clap(short, long, default_value = "artifacts")]
    artifacts: PathBuf,

    /// Run only the named case, skipping the rest.
    #[clap(short, long)]
    only: Option<String>,
}

#[derive(Debug)]
enum CaseStatus {
    Passed,
    Skipped,
    Failed { stage: &'static str, reason: String },
}

fn discover_cases(artifacts: &Path) -> Result<Vec<PathBuf>> {
    let pattern = artifacts.join("*/meta.yaml");
    let pattern = pattern
        .to_str()
        .context("artifacts path is not valid UTF-8")?;
    let mut dirs = Vec::new();
    for entry in glob::glob(pattern)? {
        let meta = entry?;
        if let Some(dir) = meta.parent() {
            dirs.push(dir.to_owned());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn case_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

/// Run one case to completion. The instance, when one was created, is torn
/// down on every path out of this function: early failure paths drop it,
/// and the success path frees it before the context is read.
fn run_case<E: Engine>(host: &VmHost<'_, E>, dir: &Path) -> CaseStatus {
    let fixture = match Fixture::load(dir.join("meta.yaml")) {
        Ok(fixture) => fixture,
        Err(e) => {
            return CaseStatus::Failed {
                stage: "fixture",
                reason: format!("{e:#}"),
            }
        }
    };
    if fixture.skip {
        return CaseStatus::Skipped;
    }
    if let Some(description) = &fixture.description {
        log::debug!("{description}");
    }

    let image = match loader::load_snapshot(dir.join("snapshot.bin")) {
        Ok(image) => image,
        Err(e) => {
            return CaseStatus::Failed {
                stage: "load",
                reason: format!("{e:#}"),
            }
        }
    };

    let context = ExecutionContext::shared();
    let mut vm = match host.restore(&image, Rc::clone(&context)) {
        Ok(vm) => vm,
        Err(e) => {
            return CaseStatus::Failed {
                stage: "restore",
                reason: e.to_string(),
            }
        }
    };

    if let Some(id) = fixture.run_exported_function {
        println!("    runExportedFunction: {id}");
        let exported = match host.resolve_exports(&mut vm, &[id]) {
            Ok(exports) => match exports.into_iter().next() {
                Some(value) => value,
                None => {
                    return CaseStatus::Failed {
                        stage: "resolve-exports",
                        reason: "engine returned no value for a resolved export".to_string(),
                    }
                }
            },
            Err(e) => {
                return CaseStatus::Failed {
                    stage: "resolve-exports",
                    reason: e.to_string(),
                }
            }
        };
        if let Err(e) = host.invoke(&mut vm, &exported, &[]) {
            return CaseStatus::Failed {
                stage: "invoke",
                reason: e.to_string(),
            };
        }
    }
    host.free(vm);

    let report = RunReport::capture(&context.borrow());
    for assertion in &report.assertions {
        if assertion.passed {
            println!("    Pass: {}", assertion.message);
        } else {
            println!("    Fail: {}", assertion.message);
        }
    }

    let judgment = oracle::check(&report, fixture.expected_printout.as_deref());
    report_judgment(&judgment, fixture.expected_printout.is_some())
}

fn report_judgment(judgment: &Judgment, had_expectation: bool) -> CaseStatus {
    if judgment.passed() {
        if had_expectation {
            println!("    Pass: expected printout matches");
        }
        return CaseStatus::Passed;
    }

    let mut reasons = Vec::new();
    if let Some(mismatch) = &judgment.mismatch {
        println!("    Fail: expected printout does not match");
        println!("    expected: {:?}", mismatch.expected);
        println!("    actual:   {:?}", mismatch.actual);
        reasons.push("expected printout does not match".to_string());
    }
    if !judgment.failed_assertions.is_empty() {
        reasons.push(format!(
            "{} assertion(s) failed",
            judgment.failed_assertions.len()
        ));
    }
    CaseStatus::Failed {
        stage: "check",
        reason: reasons.join("; "),
    }
}

fn run(args: &Args) -> Result<()> {
    let case_dirs = discover_cases(&args.artifacts)
        .with_context(|| format!("discover cases under {:?}", args.artifacts))?;
    if case_dirs.is_empty() {
        bail!("no test cases under {:?}", args.artifacts);
    }

    // Built once at startup; shared read-only by every case.
    let registry = hostfns::standard();
    let host = VmHost::new(ScriptedEngine::new(), &registry);

    let mut passed = 0usize;
    let mut skipped = 0usize;
    let mut failed = Vec::new();
    for dir in &case_dirs {
        let name = case_name(dir);
        if let Some(only) = &args.only {
            if *only != name {
                println!("{name}... skipping");
                skipped += 1;
                continue;
            }
        }
        println!("{name}... running");

        match run_case(&host, dir) {
            CaseStatus::Passed => passed += 1,
            CaseStatus::Skipped => {
                println!("    skipping (fixture)");
                skipped += 1;
            }
            CaseStatus::Failed { stage, reason } => {
                error!("{name} failed during {stage}: {reason}");
                failed.push(name);
            }
        }
    }

    println!("{passed} passed, {} failed, {skipped} skipped", failed.len());
    if !failed.is_empty() {
        bail!("{} of {} cases failed", failed.len(), case_dirs.len());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapvm_host::hostfns::HOST_FN_PRINT;
    use snapvm_host::scripted::{Body, ScriptedValue, SnapshotBuilder};

    fn write_case(root: &Path, name: &str, meta: &str, image: &[u8]) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("meta.yaml"), meta).unwrap();
        std::fs::write(dir.join("snapshot.bin"), image).unwrap();
    }

    #[test]
    fn discovers_and_runs_generated_cases() {
        let root = std::env::temp_dir().join(format!("snapvm-conformance-{}", std::process::id()));
        if root.exists() {
            std::fs::remove_dir_all(&root).unwrap();
        }

        let hello = SnapshotBuilder::new()
            .import(HOST_FN_PRINT)
            .export(
                1,
                Body::new().call_host(HOST_FN_PRINT, &[ScriptedValue::Str("hello".into())]),
            )
            .build();
        write_case(
            &root,
            "print-hello",
            "runExportedFunction: 1\nexpectedPrintout: hello\n",
            &hello,
        );
        write_case(
            &root,
            "restore-only",
            "description: restore without invoking\n",
            &SnapshotBuilder::new().build(),
        );
        write_case(
            &root,
            "wrong-printout",
            "runExportedFunction: 1\nexpectedPrintout: goodbye\n",
            &hello,
        );

        let case_dirs = discover_cases(&root).unwrap();
        assert_eq!(case_dirs.len(), 3);

        let registry = hostfns::standard();
        let host = VmHost::new(ScriptedEngine::new(), &registry);

        assert!(matches!(
            run_case(&host, &root.join("print-hello")),
            CaseStatus::Passed
        ));
        assert!(matches!(
            run_case(&host, &root.join("restore-only")),
            CaseStatus::Passed
        ));
        assert!(matches!(
            run_case(&host, &root.join("wrong-printout")),
            CaseStatus::Failed { stage: "check", .. }
        ));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_snapshot_fails_the_case_only() {
        let root = std::env::temp_dir().join(format!(
            "snapvm-conformance-missing-{}",
            std::process::id()
        ));
        if root.exists() {
            std::fs::remove_dir_all(&root).unwrap();
        }
        let dir = root.join("no-snapshot");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("meta.yaml"), "runExportedFunction: 0\n").unwrap();

        let registry = hostfns::standard();
        let host = VmHost::new(ScriptedEngine::new(), &registry);

        assert!(matches!(
            run_case(&host, &dir),
            CaseStatus::Failed { stage: "load", .. }
        ));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
