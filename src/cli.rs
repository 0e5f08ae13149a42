use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{NagaBackend, PassthroughBackend, ShaderBackend};
use crate::config::ComposerConfig;
use crate::gpu::WgpuBackend;
use crate::material_data::{self, MaterialData};
use crate::material_instance::MaterialInstance;
use crate::pattern::PatternCatalog;
use crate::program::Artifact;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a material file and print the generated program
    Compile {
        /// Material JSON file
        material: PathBuf,

        /// Composer config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Backend used to accept the program
        #[arg(long, value_enum, default_value_t = BackendChoice::Naga)]
        backend: BackendChoice,

        /// What to print
        #[arg(long, value_enum, default_value_t = Emit::All)]
        emit: Emit,
    },
    /// Print the pattern catalog as JSON
    Catalog,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendChoice {
    /// Accept every program without validation
    #[value(name = "none")]
    Passthrough,
    /// Validate with naga
    Naga,
    /// Build render pipelines on a headless wgpu device
    Wgpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    Vertex,
    Fragment,
    Uniforms,
    All,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            material,
            config,
            backend,
            emit,
        } => compile(material, config, backend, emit),
        Commands::Catalog => {
            let schemas = PatternCatalog::builtin().schemas();
            println!("{}", serde_json::to_string_pretty(&schemas)?);
            Ok(())
        }
    }
}

fn make_backend(choice: BackendChoice) -> Result<Arc<dyn ShaderBackend>> {
    Ok(match choice {
        BackendChoice::Passthrough => Arc::new(PassthroughBackend::new()),
        BackendChoice::Naga => Arc::new(NagaBackend::new()),
        BackendChoice::Wgpu => {
            let (backend, _queue) = WgpuBackend::headless(wgpu::TextureFormat::Rgba8UnormSrgb)?;
            Arc::new(backend)
        }
    })
}

fn compile(
    material_path: PathBuf,
    config_path: Option<PathBuf>,
    backend: BackendChoice,
    emit: Emit,
) -> Result<()> {
    let text = std::fs::read_to_string(&material_path)
        .with_context(|| format!("Failed to read {}", material_path.display()))?;
    let data = MaterialData::from_json(&text)?;
    let config = match config_path {
        Some(path) => ComposerConfig::from_file(&path)?,
        None => ComposerConfig::default(),
    };

    let backend = make_backend(backend)?;
    log::info!("Compiling {} with the {} backend", material_path.display(), backend.name());

    let (spec, mut diagnostics) = material_data::deserialize(&data);
    let mut instance = MaterialInstance::with_config(spec, backend, config);
    let result = instance.ensure_compiled().map(|_| ());
    diagnostics.extend(instance.take_diagnostics());

    for diagnostic in &diagnostics {
        eprintln!("{}", diagnostic);
    }
    if let Err(e) = &result {
        eprintln!("Program rejected: {}", e);
    }

    match instance.artifact() {
        Some(Artifact::Program(program)) => {
            if matches!(emit, Emit::Vertex | Emit::All) {
                println!("{}", program.source.vertex);
            }
            if matches!(emit, Emit::Fragment | Emit::All) {
                println!("{}", program.source.fragment);
            }
            if matches!(emit, Emit::Uniforms | Emit::All) {
                println!("{}", serde_json::to_string_pretty(program.uniforms.entries())?);
            }
        }
        Some(Artifact::FixedFunction(params)) => {
            let base = material_data::BaseSurfaceData::from(&params.surface);
            println!(
                "Fixed-function{}: {}",
                if params.fallback { " (fallback)" } else { "" },
                serde_json::to_string_pretty(&base)?
            );
        }
        None => anyhow::bail!("No artifact was produced"),
    }

    Ok(())
}
