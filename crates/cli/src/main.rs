//! `defloom` binary.
//!
//! Loads definition sources with only the built-in types registered, so it
//! stops short of materialization: it merges sources, resolves `Parent`
//! chains, applies `ModifyPatch` documents and prints the master document.

mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command};
use defloom_define::{DefDatabase, Diagnostics, LoadConfig, LoadSession, Severity, TypeRegistryBuilder};

fn main() -> anyhow::Result<ExitCode> {
	let cli = Cli::parse();
	setup_tracing();

	let config = match &cli.config {
		Some(path) => {
			LoadConfig::from_file(path).with_context(|| format!("failed to read config {}", path.display()))?
		}
		None => LoadConfig::default(),
	};

	match cli.command {
		Command::Resolve { paths, patches } => {
			let (master, diagnostics) = resolve(config, &paths, &patches)?;
			print!("{master}");
			eprintln!("{}", summary(&diagnostics));
			Ok(if diagnostics.has_errors() {
				ExitCode::FAILURE
			} else {
				ExitCode::SUCCESS
			})
		}
	}
}

/// Returns the resolved master document as KDL with the diagnostics of the load.
fn resolve(config: LoadConfig, paths: &[PathBuf], patches: &[PathBuf]) -> anyhow::Result<(String, Diagnostics)> {
	let mut db = DefDatabase::new(Arc::new(TypeRegistryBuilder::new().build()));
	let mut session = db.start_loading(config);
	for path in paths {
		append(&mut session, path)?;
	}
	session.finish_adding_defs()?;
	for path in patches {
		let applied = session.apply_patches_file(path)?;
		tracing::info!(path = %path.display(), applied, "applied patches");
	}
	Ok((session.master_kdl(), session.diagnostics().clone()))
}

fn append(session: &mut LoadSession<'_>, path: &Path) -> anyhow::Result<()> {
	if path.is_dir() {
		let files = session.append_dir(path)?;
		tracing::info!(path = %path.display(), files, "loaded directory");
	} else {
		session.append_file(path)?;
	}
	Ok(())
}

fn summary(diagnostics: &Diagnostics) -> String {
	let errors = diagnostics.error_count();
	let warnings = diagnostics.iter().filter(|d| d.severity == Severity::Warning).count();
	format!("{errors} error(s), {warnings} warning(s)")
}

fn setup_tracing() {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(false)
		.init();
}
