//! Thin CLI over the harcap library
//!
//! Subcommands: `capture`, `diff`, `list`, `delete`. Exit codes follow
//! the library's taxonomy: 0 success, 2 configuration, 3 launch/attach,
//! 4 navigation timeout, 5 capture failure, 6 diff failure.

use std::collections::BTreeMap;
use std::path::PathBuf;

use harcap::{
    CaptureStore, Error, FilterStage, ReportFormat, RuleConfig, SessionHooks, SessionOptions,
    Significance,
};
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!(
        "usage:\n  \
         harcap capture <url> [--out <file>] [--workdir <dir>] [--name <name>] \
[--block <regex>]... [--omit <regex>]... [--filter <expr>] [--stream] [--bodies] [--headful]\n  \
         harcap diff <baseline-id> <compare-id> --workdir <dir> [--format json|html|text|csv] [--min low|medium|high]\n  \
         harcap list --workdir <dir>\n  \
         harcap delete <id> --workdir <dir>"
    );
    std::process::exit(2);
}

fn take_value(args: &mut Vec<String>, index: usize, flag: &str) -> String {
    if index + 1 >= args.len() {
        eprintln!("{flag} requires a value");
        std::process::exit(2);
    }
    args.remove(index); // the flag
    args.remove(index) // its value
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    env_logger::Builder::from_default_env().try_init().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(mut args: Vec<String>) -> Result<(), Error> {
    if args.is_empty() {
        usage();
    }
    let command = args.remove(0);
    match command.as_str() {
        "capture" => run_capture(args).await,
        "diff" => run_diff(args).await,
        "list" => run_list(args).await,
        "delete" => run_delete(args).await,
        _ => usage(),
    }
}

async fn run_capture(mut args: Vec<String>) -> Result<(), Error> {
    let mut out: Option<PathBuf> = None;
    let mut workdir: Option<PathBuf> = None;
    let mut name: Option<String> = None;
    let mut rules = RuleConfig::default();
    let mut filter_expr: Option<String> = None;
    let mut stream = false;
    let mut opts = SessionOptions::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--out" => out = Some(PathBuf::from(take_value(&mut args, i, "--out"))),
            "--workdir" => workdir = Some(PathBuf::from(take_value(&mut args, i, "--workdir"))),
            "--name" => name = Some(take_value(&mut args, i, "--name")),
            "--block" => rules.block.push(take_value(&mut args, i, "--block")),
            "--omit" => rules.omit.push(take_value(&mut args, i, "--omit")),
            "--filter" => filter_expr = Some(take_value(&mut args, i, "--filter")),
            "--stream" => {
                stream = true;
                args.remove(i);
            }
            "--bodies" => {
                opts.body_capture.enabled = true;
                args.remove(i);
            }
            "--headful" => {
                opts.headless = false;
                args.remove(i);
            }
            _ => i += 1,
        }
    }
    let Some(url) = args.first().cloned() else {
        usage();
    };
    if !rules.is_empty() {
        opts.blocking = Some(rules);
    }

    let filter = FilterStage::new(filter_expr.as_deref(), None)?;
    let mut hooks = SessionHooks {
        filter: Some(std::sync::Arc::new(filter)),
        ..Default::default()
    };

    let mut stream_task = None;
    if stream {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(64);
        hooks.stream = Some(tx);
        stream_task = Some(tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                println!("{line}");
            }
        }));
    }

    let har = harcap::capture_with(&url, opts, hooks).await?;
    if let Some(task) = stream_task {
        let _ = task.await;
    }

    let bytes = serde_json::to_vec_pretty(&har)
        .map_err(|e| Error::Capture(format!("HAR serialization failed: {e}")))?;

    if let Some(workdir) = workdir {
        let store = CaptureStore::open(&workdir)?;
        let record = store
            .create_baseline(
                name.as_deref().unwrap_or("capture"),
                &url,
                BTreeMap::new(),
            )
            .await?;
        let record = store.complete(&record.id, &bytes).await?;
        println!("{}", record.id);
    }
    match out {
        Some(path) => std::fs::write(&path, &bytes).map_err(|e| Error::io(path, e))?,
        None if !stream => {
            use std::io::Write as _;
            std::io::stdout()
                .write_all(&bytes)
                .map_err(|e| Error::io("stdout", e))?;
        }
        None => {}
    }
    Ok(())
}

async fn run_diff(mut args: Vec<String>) -> Result<(), Error> {
    let mut workdir: Option<PathBuf> = None;
    let mut format = ReportFormat::Text;
    let mut min = Significance::Low;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--workdir" => workdir = Some(PathBuf::from(take_value(&mut args, i, "--workdir"))),
            "--format" => {
                let value = take_value(&mut args, i, "--format");
                format = ReportFormat::parse(&value)
                    .ok_or_else(|| Error::Validation(format!("unknown format '{value}'")))?;
            }
            "--min" => {
                let value = take_value(&mut args, i, "--min");
                min = Significance::parse(&value)
                    .ok_or_else(|| Error::Validation(format!("unknown significance '{value}'")))?;
            }
            _ => i += 1,
        }
    }
    let (Some(baseline), Some(compare)) = (args.first(), args.get(1)) else {
        usage();
    };
    let Some(workdir) = workdir else {
        return Err(Error::Validation("diff requires --workdir".into()));
    };

    let store = CaptureStore::open(&workdir)?;
    let result = harcap::diff::compare(&store, baseline, compare).await?;
    let path = harcap::diff::write_report(&store, &result, format, min).await?;
    let rendered = harcap::diff::render(&result, format, min)?;
    use std::io::Write as _;
    std::io::stdout()
        .write_all(&rendered)
        .map_err(|e| Error::io("stdout", e))?;
    eprintln!("report: {}", path.display());
    Ok(())
}

async fn run_list(mut args: Vec<String>) -> Result<(), Error> {
    let mut workdir: Option<PathBuf> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--workdir" => workdir = Some(PathBuf::from(take_value(&mut args, i, "--workdir"))),
            _ => i += 1,
        }
    }
    let Some(workdir) = workdir else {
        return Err(Error::Validation("list requires --workdir".into()));
    };
    let store = CaptureStore::open(&workdir)?;
    for record in store.list().await? {
        println!(
            "{}\t{:?}\t{}\t{}",
            record.id, record.status, record.name, record.url
        );
    }
    Ok(())
}

async fn run_delete(mut args: Vec<String>) -> Result<(), Error> {
    let mut workdir: Option<PathBuf> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--workdir" => workdir = Some(PathBuf::from(take_value(&mut args, i, "--workdir"))),
            _ => i += 1,
        }
    }
    let Some(id) = args.first() else {
        usage();
    };
    let Some(workdir) = workdir else {
        return Err(Error::Validation("delete requires --workdir".into()));
    };
    let store = CaptureStore::open(&workdir)?;
    store.delete(id).await?;
    Ok(())
}
