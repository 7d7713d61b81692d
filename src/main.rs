use std::fs::{self, File};
use std::io::{stdin, stdout, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{bail, IntoDiagnostic, NamedSource, Report, Result};

use stackproc::{status_message, Processor};

/// Assembler and processor for a small register and stack virtual machine.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a text `.asm` file into a binary `.bin` file
    Assemble {
        /// `.asm` file to assemble
        name: PathBuf,
        /// Destination of the binary, defaults to the source with a `.bin` extension
        dest: Option<PathBuf>,
    },
    /// Execute a binary `.bin` file and report its terminal status
    Exec {
        /// `.bin` file to execute
        name: PathBuf,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Run text `.asm` or binary `.bin` file directly
    Run {
        /// `.asm` or `.bin` file to run
        name: PathBuf,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Check a `.asm` file without outputting binary
    Check {
        /// File to check
        name: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    use MsgColor::*;
    let args = Args::parse();
    stackproc::env::init();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(stackproc::env::log_level())
        .init();

    match args.command {
        Command::Assemble { name, dest } => {
            file_message(Green, "Assembling", &name);
            let code = assemble(&name)?;

            let out_file_name = dest.unwrap_or_else(|| name.with_extension("bin"));
            save(&out_file_name, &code)?;

            message(Green, "Finished", &format!("emit binary ({} bytes)", code.len()));
            file_message(Green, "Saved", &out_file_name);
            Ok(ExitCode::SUCCESS)
        }
        Command::Exec { name, minimal } => {
            if !minimal {
                file_message(Green, "Loading", &name);
            }
            let code = load(&name)?;
            Ok(execute(&name, &code, minimal))
        }
        Command::Run { name, minimal } => {
            let code = match name.extension().and_then(|ext| ext.to_str()) {
                Some("bin") => load(&name)?,
                Some("asm") => {
                    if !minimal {
                        file_message(Green, "Assembling", &name);
                    }
                    assemble(&name)?
                }
                Some(_) => bail!("File has unknown extension. Exiting..."),
                None => bail!("File has no extension. Exiting..."),
            };
            Ok(execute(&name, &code, minimal))
        }
        Command::Check { name } => {
            file_message(Green, "Checking", &name);
            let _ = assemble(&name)?;
            message(Green, "Success", "no errors found!");
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

/// Assemble a source file, attaching the source to any diagnostic.
fn assemble(name: &Path) -> Result<Vec<u8>> {
    let src = fs::read_to_string(name).into_diagnostic()?;
    stackproc::assemble(&src).map_err(|err| {
        Report::new(err).with_source_code(NamedSource::new(name.display().to_string(), src))
    })
}

/// Write a binary through a sibling temporary file, so `dest` only ever holds complete output.
fn save(dest: &Path, code: &[u8]) -> Result<()> {
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = File::create(&tmp)
        .and_then(|mut file| file.write_all(code))
        .and_then(|()| fs::rename(&tmp, dest));
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written.into_diagnostic()
}

/// Read a binary file into a code buffer.
fn load(name: &Path) -> Result<Vec<u8>> {
    let code = fs::read(name).into_diagnostic()?;
    if code.is_empty() {
        bail!("File is empty!");
    }
    Ok(code)
}

/// Run a code buffer against stdin/stdout and print its status.
fn execute(name: &Path, code: &[u8], minimal: bool) -> ExitCode {
    if !minimal {
        message(MsgColor::Green, "Running", "emitted binary");
    }
    let mut processor = Processor::new(stdin().lock(), stdout().lock());
    let result = processor.execute(code);
    drop(processor);

    let status = status_message(&result);
    if minimal {
        println!("{status}");
    } else {
        let color = if result.is_ok() {
            MsgColor::Cyan
        } else {
            MsgColor::Red
        };
        message(color, "Status", &status);
        file_message(MsgColor::Green, "Completed", name);
    }
    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
