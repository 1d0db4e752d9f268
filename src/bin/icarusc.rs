//! The compiler driver: wires the importer, diagnostics and logging around
//! the middle-end. The textual front-end is a separate component; it plugs
//! in by supplying the parse callback to [`FileImporter`]. The exit code is
//! the number of files that failed to compile.

use std::path::PathBuf;
use std::process::ExitCode;
use clap::Parser;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use icarusc::diag::LoggingConsumer;
use icarusc::module::{self, FileImporter};
use icarusc::types::ast::AstBuilder;
use icarusc::types::ty::Arch;

#[derive(Parser, Debug)]
#[command(name = "icarusc", about = "Icarus compiler")]
struct Args {
  /// Source files to compile.
  #[arg(required = true)]
  sources: Vec<PathBuf>,

  /// Comma-separated list of paths to search when importing modules.
  /// Defaults to $ICARUS_MODULE_PATH.
  #[arg(long, value_delimiter = ',')]
  module_paths: Vec<PathBuf>,

  /// Library to be dynamically loaded by the compiler and used at compile
  /// time. Libraries are not unloaded.
  #[arg(long)]
  link: Option<String>,

  /// Comma-separated list of log categories.
  #[arg(long, value_delimiter = ',')]
  log: Vec<String>,

  /// Optimize the intermediate representation.
  #[arg(long)]
  opt_ir: bool,
}

fn main() -> ExitCode {
  let args = Args::parse();

  let level = if args.log.is_empty() { LevelFilter::Warn } else { LevelFilter::Debug };
  let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto);

  if let Some(lib) = &args.link {
    log::info!("registering compile-time library {lib}");
  }
  if args.opt_ir {
    log::warn!("--opt-ir is accepted but optimization passes live in the back-end");
  }

  let mut paths = args.module_paths.clone();
  if paths.is_empty() { paths = module::module_paths_from_env() }

  // Until a front-end is linked, every file parses to an empty module; the
  // front-end crate replaces this callback with its parser.
  let parse: module::ParseFn = Box::new(|_text, _diag| AstBuilder::new().finish());
  let diag = Box::new(LoggingConsumer::default());
  let mut importer = FileImporter::new(paths, parse, diag, Arch::HOST);

  let mut failed: u8 = 0;
  for source in &args.sources {
    let before = importer.diagnostic_count();
    match importer.compile_root(source) {
      Some(_) if importer.diagnostic_count() == before => {}
      Some(_) => failed = failed.saturating_add(1),
      None => {
        log::error!("cannot read {}", source.display());
        failed = failed.saturating_add(1);
      }
    }
  }
  ExitCode::from(failed)
}
