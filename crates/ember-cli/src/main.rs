//! ember-bootimage: offline boot image builder for the Ember VM.
//!
//! Consumes a classpath of compiled classes and writes a relocatable boot
//! image the VM can mmap and execute without re-parsing classes at startup.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ember_builder::{build_boot_image, BuilderConfig, TrampolineProcessor};
use ember_image::{BuildSpec, Endian, TargetSpec, WordWidth};
use ember_runtime::finder::{compose_classpath, ClasspathFinder};
use ember_runtime::Machine;

#[derive(Parser)]
#[command(
    name = "ember-bootimage",
    about = "Build a boot image for the Ember VM",
    version
)]
struct Cli {
    /// Classpath roots, separated by `:`
    classpath: String,

    /// Output image file
    output: PathBuf,

    /// Restrict compilation to this class
    class_name: Option<String>,

    /// Restrict compilation to methods with this name
    method_name: Option<String>,

    /// Restrict compilation to methods with this descriptor
    method_spec: Option<String>,

    /// Target word width in bits
    #[arg(long, value_parser = ["32", "64"], default_value = "64")]
    target_word: String,

    /// Target byte order
    #[arg(long, value_parser = ["little", "big"], default_value = "little")]
    target_endian: String,

    /// Build-side word width in bits
    #[arg(long, value_parser = ["32", "64"], default_value = "64")]
    build_word: String,
}

fn word_width(flag: &str) -> WordWidth {
    if flag == "32" {
        WordWidth::W32
    } else {
        WordWidth::W64
    }
}

fn endian(flag: &str) -> Endian {
    if flag == "big" {
        Endian::Big
    } else {
        Endian::Little
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let config = BuilderConfig {
        build: BuildSpec::new(word_width(&cli.build_word)),
        target: TargetSpec::new(word_width(&cli.target_word), endian(&cli.target_endian)),
        class_name: cli.class_name,
        method_name: cli.method_name,
        method_spec: cli.method_spec,
        ..Default::default()
    };

    let java_home = std::env::var("EMBER_JAVA_HOME").ok();
    let embed_prefix = std::env::var("EMBER_EMBED_PREFIX").ok();
    let roots = compose_classpath(&cli.classpath, java_home.as_deref(), embed_prefix.as_deref());
    let finder = ClasspathFinder::with_roots(roots);

    let mut output = match File::create(&cli.output) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("unable to open {}: {e}", cli.output.display());
            return ExitCode::FAILURE;
        }
    };

    let mut machine = Machine::new(config.build);
    let mut processor = TrampolineProcessor::new();
    match build_boot_image(&mut machine, &finder, &mut processor, &config, &mut output) {
        Ok(summary) => {
            tracing::info!(output = %cli.output.display(), ?summary, "boot image written");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("boot image build failed: {e}");
            ExitCode::FAILURE
        }
    }
}
