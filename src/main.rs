use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::debug;

use tessera::config::{self, EnvironmentOptions};
use tessera::diagnostics::{render_error, TemplateError};
use tessera::visit::template_references;
use tessera::{Environment, FilesystemLoader, Map, Source, Value};

#[derive(Parser)]
#[command(name = "tessera", version, about = "Compile and render templates")]
struct Cli {
    /// Options file (defaults to the nearest tessera.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the token stream of a template
    Lex {
        file: PathBuf,
        /// Emit tokens as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the syntax tree of a template
    Parse {
        file: PathBuf,
        /// Only list the templates it refers to
        #[arg(long)]
        refs: bool,
    },
    /// Print the generated code for a template
    Compile {
        file: PathBuf,
        /// Write the code here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also print the generated-line to template-line map
        #[arg(long)]
        debug_map: bool,
    },
    /// Render a template
    Render {
        file: PathBuf,
        /// JSON object used as the template context
        #[arg(long)]
        context: Option<String>,
        /// Extra directories to load included templates from
        #[arg(long = "templates")]
        templates: Vec<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(level).with_target(false).init();
}

fn load_options(explicit: Option<&Path>) -> Result<EnvironmentOptions, TemplateError> {
    if let Some(path) = explicit {
        return config::load(path);
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match config::discover(&cwd) {
        Some(path) => {
            debug!(path = %path.display(), "using config file");
            config::load(&path)
        }
        None => Ok(EnvironmentOptions::default()),
    }
}

fn read_source(file: &Path) -> Result<Source, TemplateError> {
    let code = std::fs::read_to_string(file)
        .map_err(|err| TemplateError::loader(format!("Unable to read \"{}\": {err}", file.display())))?;
    let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(Source::new(code, name, file.to_string_lossy()))
}

/// The file's own directory first, then `--templates`, then the configured paths.
fn environment(file: &Path, templates: &[PathBuf], options: EnvironmentOptions) -> Environment {
    let dir = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut paths = vec![dir.to_path_buf()];
    paths.extend(templates.iter().cloned());
    paths.extend(options.template_paths.iter().cloned());
    Environment::with_options(FilesystemLoader::new(paths), options)
}

fn parse_context(json: Option<&str>) -> Result<Map, TemplateError> {
    let Some(json) = json else {
        return Ok(Map::new());
    };
    let parsed: serde_json::Value =
        serde_json::from_str(json).map_err(|err| TemplateError::runtime(format!("Invalid --context JSON: {err}")))?;
    match Value::from(parsed) {
        Value::Map(map) => Ok(map),
        other => Err(TemplateError::runtime(format!(
            "The --context JSON must be an object, got {}.",
            other.type_name()
        ))),
    }
}

fn run(cli: Cli) -> Result<(), TemplateError> {
    let options = load_options(cli.config.as_deref())?;

    match cli.command {
        Commands::Lex { file, json } => {
            let env = environment(&file, &[], options);
            let stream = env.tokenize(&read_source(&file)?)?;
            if json {
                let out = serde_json::to_string_pretty(stream.tokens())
                    .map_err(|err| TemplateError::runtime(format!("Unable to encode tokens: {err}")))?;
                println!("{out}");
            } else {
                for token in stream.tokens() {
                    println!("{:>4}  {:<20} {:?}", token.line, format!("{:?}", token.kind), token.value);
                }
            }
        }
        Commands::Parse { file, refs } => {
            let env = environment(&file, &[], options);
            let module = env.parse(env.tokenize(&read_source(&file)?)?)?;
            if refs {
                for name in template_references(&module) {
                    println!("{name}");
                }
            } else {
                println!("{module:#?}");
            }
        }
        Commands::Compile { file, output, debug_map } => {
            let env = environment(&file, &[], options);
            let unit = env.compile_source(&read_source(&file)?)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &unit.code).map_err(|err| {
                        TemplateError::runtime(format!("Unable to write \"{}\": {err}", path.display()))
                    })?;
                    eprintln!("compiled {} \u{2192} {}", file.display(), path.display());
                }
                None => print!("{}", unit.code),
            }
            if debug_map {
                for (generated, line) in &unit.debug_info {
                    eprintln!("{generated:>6} -> {line}");
                }
            }
        }
        Commands::Render { file, context, templates } => {
            let env = environment(&file, &templates, options);
            let context = parse_context(context.as_deref())?;
            let source = read_source(&file)?;
            print!("{}", env.render(source.name(), context)?);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        render_error(&err);
        std::process::exit(1);
    }
}
