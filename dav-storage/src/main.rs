use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use dav_storage::{DavStorage, FreeSpace, OpenMode, StorageParams};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    List(String),
    Stat(String),
    Cat(String),
    Put { local: PathBuf, remote: String },
    Mkdir(String),
    Remove(String),
    Move { source: String, target: String },
    FreeSpace,
    Help,
}

fn parse_command<I>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(name) = args.next() else {
        return Ok(Command::Help);
    };
    let command = match name.as_str() {
        "ls" => Command::List(args.next().unwrap_or_else(|| "/".to_string())),
        "stat" => Command::Stat(operand(&mut args, "PATH")?),
        "cat" => Command::Cat(operand(&mut args, "PATH")?),
        "put" => Command::Put {
            local: PathBuf::from(operand(&mut args, "LOCAL")?),
            remote: operand(&mut args, "REMOTE")?,
        },
        "mkdir" => Command::Mkdir(operand(&mut args, "PATH")?),
        "rm" => Command::Remove(operand(&mut args, "PATH")?),
        "mv" => Command::Move {
            source: operand(&mut args, "SRC")?,
            target: operand(&mut args, "DST")?,
        },
        "df" => Command::FreeSpace,
        "--help" | "-h" | "help" => Command::Help,
        other => anyhow::bail!("unknown command: {other}"),
    };
    if let Some(extra) = args.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }
    Ok(command)
}

fn operand(args: &mut impl Iterator<Item = String>, name: &str) -> anyhow::Result<String> {
    args.next()
        .with_context(|| format!("missing {name} argument"))
}

fn print_usage() {
    println!("Usage: dav-storage <command> [args]");
    println!("  ls [PATH]          List a remote directory");
    println!("  stat PATH          Show size, mtime and type");
    println!("  cat PATH           Print a remote file");
    println!("  put LOCAL REMOTE   Upload a local file");
    println!("  mkdir PATH         Create a remote directory");
    println!("  rm PATH            Remove a remote file or empty directory");
    println!("  mv SRC DST         Move a remote object");
    println!("  df                 Show free space at the mount root");
    println!();
    println!("The mount is read from DAV_MOUNT_FILE (JSON) or DAV_HOST, DAV_USER,");
    println!("DAV_PASSWORD, DAV_SECURE, DAV_ROOT, DAV_CA_FILE and DAV_SCRATCH_DIR.");
}

fn load_params() -> anyhow::Result<StorageParams> {
    match std::env::var("DAV_MOUNT_FILE") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read mount file {path}"))?;
            Ok(StorageParams::from_json(&json)?)
        }
        Err(_) => Ok(StorageParams::from_env()),
    }
}

async fn run(storage: &DavStorage, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List(path) => {
            let listing = storage
                .opendir(&path)
                .await
                .with_context(|| format!("cannot open directory {path}"))?;
            for name in listing {
                println!("{name}");
            }
        }
        Command::Stat(path) => {
            let stat = storage
                .stat(&path)
                .await
                .with_context(|| format!("cannot stat {path}"))?;
            let mtime = stat
                .mtime
                .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
                .map(|elapsed| elapsed.as_secs().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!("size:  {}", stat.size);
            println!("mtime: {mtime}");
            if let Some(kind) = storage.filetype(&path).await {
                println!("type:  {kind:?}");
            }
            if let Some(mime) = storage.mime_type(&path).await {
                println!("mime:  {mime}");
            }
        }
        Command::Cat(path) => {
            let mut stream = storage
                .open_read(&path)
                .await
                .with_context(|| format!("cannot read {path}"))?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut stream, &mut stdout).await?;
            stdout.flush().await?;
        }
        Command::Put { local, remote } => {
            let mut source = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("cannot open {}", local.display()))?;
            let mut handle = storage
                .open_write(&remote, OpenMode::Write)
                .await
                .with_context(|| format!("cannot open {remote} for writing"))?;
            tokio::io::copy(&mut source, &mut handle).await?;
            let bytes = handle.close().await?;
            println!("uploaded {bytes} bytes to {remote}");
        }
        Command::Mkdir(path) => {
            anyhow::ensure!(storage.mkdir(&path).await, "mkdir failed for {path}");
        }
        Command::Remove(path) => {
            let removed = if storage.is_dir(&path).await {
                storage.rmdir(&path).await
            } else {
                storage.unlink(&path).await
            };
            anyhow::ensure!(removed, "rm failed for {path}");
        }
        Command::Move { source, target } => {
            anyhow::ensure!(
                storage.rename(&source, &target).await,
                "mv failed for {source} -> {target}"
            );
        }
        Command::FreeSpace => match storage.free_space("/").await {
            FreeSpace::Known(bytes) => println!("{bytes}"),
            FreeSpace::Unknown => println!("unknown"),
        },
        Command::Help => print_usage(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = parse_command(std::env::args())?;
    if command == Command::Help {
        print_usage();
        return Ok(());
    }
    let storage = DavStorage::new(load_params()?).context("invalid mount configuration")?;
    tracing::debug!(id = %storage.id(), "mount configured");
    run(&storage, command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        std::iter::once("dav-storage")
            .chain(items.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parse_command_defaults_to_help() {
        assert_eq!(parse_command(args(&[])).unwrap(), Command::Help);
    }

    #[test]
    fn parse_command_supports_ls_with_default_root() {
        assert_eq!(
            parse_command(args(&["ls"])).unwrap(),
            Command::List("/".to_string())
        );
        assert_eq!(
            parse_command(args(&["ls", "/Docs"])).unwrap(),
            Command::List("/Docs".to_string())
        );
    }

    #[test]
    fn parse_command_supports_put_and_mv() {
        assert_eq!(
            parse_command(args(&["put", "notes.txt", "/Docs/notes.txt"])).unwrap(),
            Command::Put {
                local: PathBuf::from("notes.txt"),
                remote: "/Docs/notes.txt".to_string(),
            }
        );
        assert_eq!(
            parse_command(args(&["mv", "/a.txt", "/b/a.txt"])).unwrap(),
            Command::Move {
                source: "/a.txt".to_string(),
                target: "/b/a.txt".to_string(),
            }
        );
    }

    #[test]
    fn parse_command_rejects_missing_and_extra_arguments() {
        assert!(parse_command(args(&["cat"])).is_err());
        assert!(parse_command(args(&["df", "/extra"])).is_err());
        assert!(parse_command(args(&["frobnicate"])).is_err());
    }
}
