use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::thread;

use cairn_core::action::{parser, ActionContext, ActionFactory, Severity};
use cairn_core::action_log::ActionLog;
use cairn_core::dispatch::{DispatchEvent, Dispatcher};
use cairn_core::persistence;
use cairn_core::project::Project;
use cairn_core::provenance::{parse_script, Replayer};
use cairn_types::{ActionSource, ProvenanceId, SandboxId};

const USAGE: &str = "usage: cairn [-v] [--load FILE] [--log-actions] [SCRIPT]";

fn init_logging(verbose: bool) {
    use simplelog::*;

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cairn")
        .join("cairn.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = File::create(&log_path).unwrap_or_else(|_| {
        File::create("/tmp/cairn.log").expect("Cannot create log file")
    });

    WriteLogger::init(log_level, Config::default(), log_file)
        .expect("Failed to initialize logger");

    log::info!("cairn starting (log level: {:?})", log_level);
}

struct Args {
    verbose: bool,
    load: Option<PathBuf>,
    log_actions: bool,
    script: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        verbose: false,
        load: None,
        log_actions: false,
        script: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => args.verbose = true,
            "--log-actions" => args.log_actions = true,
            "--load" => {
                let path = iter.next().ok_or("--load needs a file")?;
                args.load = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with('-') => return Err(format!("unknown flag {}\n{}", other, USAGE)),
            other => args.script = Some(PathBuf::from(other)),
        }
    }
    Ok(args)
}

fn main() -> io::Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };
    init_logging(args.verbose);

    let config = cairn_core::config::Config::load();
    let mut project = Project::new(&config);
    if let Some(path) = &args.load {
        match persistence::load_project(path, &mut project) {
            Ok(report) => {
                println!("loaded {} layers, {} provenance records", report.layers, report.records);
                for id in &report.failed_states {
                    eprintln!("warning: state '{}' not restored", id);
                }
            }
            Err(e) => {
                eprintln!("error: cannot load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    }

    let dispatcher = match Dispatcher::start(project, &config) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if args.log_actions || config.action_log_enabled() {
        if let Some(path) = ActionLog::default_path() {
            match ActionLog::open(&path) {
                Ok(action_log) => {
                    action_log.attach(&dispatcher);
                }
                Err(e) => log::warn!("action log disabled: {}", e),
            }
        }
    }

    spawn_progress_printer(&dispatcher)?;

    let (input, source, interactive): (Box<dyn BufRead>, ActionSource, bool) = match &args.script {
        Some(path) => (
            Box::new(BufReader::new(File::open(path)?)),
            ActionSource::Script,
            false,
        ),
        None => (Box::new(BufReader::new(io::stdin())), ActionSource::CommandLine, true),
    };

    let session = Session {
        dispatcher: &dispatcher,
        factory: ActionFactory::with_builtins(),
        source,
    };
    let mut failed = false;
    if interactive {
        prompt()?;
    }
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            if interactive {
                prompt()?;
            }
            continue;
        }
        match session.handle_line(line) {
            Flow::Continue => {}
            Flow::Failed => {
                failed = true;
                if !interactive {
                    break;
                }
            }
            Flow::Quit => break,
        }
        if interactive {
            prompt()?;
        }
    }

    if let Err(e) = dispatcher.shutdown() {
        eprintln!("error: {}", e);
    }
    log::info!("cairn exiting");
    if failed && !interactive {
        std::process::exit(1);
    }
    Ok(())
}

fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "cairn> ")?;
    stdout.flush()
}

/// Print progress of background actions to stderr.
fn spawn_progress_printer(dispatcher: &Dispatcher) -> io::Result<()> {
    let events = dispatcher.subscribe();
    thread::Builder::new()
        .name("cairn-progress".into())
        .spawn(move || {
            for event in events {
                match event {
                    DispatchEvent::ProgressBegin { seq, tag } => eprintln!("[{}] {} started", seq, tag),
                    DispatchEvent::ProgressReport { seq, fraction } => {
                        eprintln!("[{}] {:.0}%", seq, fraction * 100.0)
                    }
                    _ => {}
                }
            }
        })?;
    Ok(())
}

enum Flow {
    Continue,
    Failed,
    Quit,
}

struct Session<'a> {
    dispatcher: &'a Dispatcher,
    factory: ActionFactory,
    source: ActionSource,
}

impl Session<'_> {
    fn handle_line(&self, line: &str) -> Flow {
        match line.strip_prefix(':') {
            Some(meta) => self.meta_command(meta),
            None => self.run_command(line),
        }
    }

    fn run_command(&self, line: &str) -> Flow {
        let action = match self.factory.create(line) {
            Ok(action) => action,
            Err(e) => {
                eprintln!("error: {}", e);
                return Flow::Failed;
            }
        };
        let context = ActionContext::new(self.source);
        if let Err(e) = self.dispatcher.post_and_wait(action, &context) {
            eprintln!("error: {}", e);
            return Flow::Failed;
        }
        for message in context.messages() {
            match message.severity {
                Severity::Warning => eprintln!("warning: {}", message.text),
                Severity::Message => println!("{}", message.text),
                Severity::Error => {}
            }
        }
        if !context.is_success() {
            eprintln!("{}: {}", context.status(), context.error_message());
            return Flow::Failed;
        }
        if let Some(result) = context.result() {
            println!("{}", parser::format_variant(&result));
        }
        let outputs = context.output_provenance_ids();
        if !outputs.is_empty() {
            let ids: Vec<String> = outputs.iter().map(|id| format!("#{}", id)).collect();
            println!("-> {}", ids.join(", "));
        }
        Flow::Continue
    }

    fn meta_command(&self, meta: &str) -> Flow {
        let mut parts = meta.split_whitespace();
        let name = parts.next().unwrap_or("");
        let rest: Vec<&str> = parts.collect();
        let outcome = match (name, rest.as_slice()) {
            ("q" | "quit", _) => return Flow::Quit,
            ("help", []) => {
                for tag in self.factory.tags() {
                    if let Some(usage) = self.factory.usage(tag) {
                        println!("{}", usage);
                    }
                }
                println!(":layers  :save FILE  :trail PID  :replay FILE [SANDBOX]  :quit");
                Ok(())
            }
            ("help", [tag]) => self
                .factory
                .usage(tag)
                .map(|usage| println!("{}", usage))
                .ok_or_else(|| format!("no action named '{}'", tag)),
            ("layers", []) => self.list_layers(),
            ("save", [path]) => self.save(Path::new(path)),
            ("trail", [pid]) => self.trail(pid),
            ("replay", [path]) => self.replay(Path::new(path), None),
            ("replay", [path, sandbox]) => match sandbox.parse::<u32>() {
                Ok(id) => self.replay(Path::new(path), Some(SandboxId::new(id))),
                Err(_) => Err(format!("'{}' is not a sandbox id", sandbox)),
            },
            _ => Err(format!("unknown command ':{}' (try :help)", meta)),
        };
        match outcome {
            Ok(()) => Flow::Continue,
            Err(message) => {
                eprintln!("error: {}", message);
                Flow::Failed
            }
        }
    }

    fn list_layers(&self) -> Result<(), String> {
        let rows = self
            .dispatcher
            .query(|project| {
                project
                    .layers()
                    .iter()
                    .map(|(_, layer)| {
                        let dims = layer.volume().dims();
                        format!(
                            "#{:<4} {:<20} {}x{}x{}{}",
                            layer.provenance_id(),
                            layer.name(),
                            dims[0],
                            dims[1],
                            dims[2],
                            if layer.busy().is_some() { "  (busy)" } else { "" }
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .map_err(|e| e.to_string())?;
        for row in rows {
            println!("{}", row);
        }
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), String> {
        let target = path.to_path_buf();
        self.dispatcher
            .query(move |project| persistence::save_project(&target, project))
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;
        println!("saved {}", path.display());
        Ok(())
    }

    fn trail(&self, pid: &str) -> Result<(), String> {
        let id: i64 = pid
            .trim_start_matches('#')
            .parse()
            .map_err(|_| format!("'{}' is not a provenance id", pid))?;
        let script = self
            .dispatcher
            .query(move |project| project.provenance().export_script(ProvenanceId::new(id)))
            .map_err(|e| e.to_string())?;
        print!("{}", script);
        Ok(())
    }

    fn replay(&self, path: &Path, sandbox: Option<SandboxId>) -> Result<(), String> {
        let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let steps = parse_script(&text).map_err(|e| e.to_string())?;
        let produced = Replayer::new(ActionFactory::with_builtins())
            .replay(self.dispatcher, &steps, sandbox)
            .map_err(|e| e.to_string())?;
        println!("replayed {} steps, {} outputs", steps.len(), produced.len());
        Ok(())
    }
}
