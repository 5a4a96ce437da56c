// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Management CLI for reedtree database files.
//!
//! One-shot commands to create, inspect and edit a database from the
//! shell. Keys and values are taken as UTF-8 text.

use clap::{Parser, Subcommand, ValueEnum};
use reedtree::{Btree, BtreeOptions, Codec, DupMode, OpenMode, ReedResult};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reedtree", version, about = "Manage reedtree database files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty database file.
    Create {
        path: PathBuf,
        /// Target members per leaf page.
        #[arg(long)]
        lmemb: Option<u32>,
        /// Target members per node page.
        #[arg(long)]
        nmemb: Option<u32>,
        /// Bucket array size.
        #[arg(long)]
        bnum: Option<u64>,
        /// Record alignment power.
        #[arg(long)]
        apow: Option<u8>,
        /// Free pool capacity power.
        #[arg(long)]
        fpow: Option<u8>,
        /// Use 8-byte bucket slots.
        #[arg(long)]
        large: bool,
        /// Compress page payloads with Deflate.
        #[arg(long, conflicts_with = "xz")]
        deflate: bool,
        /// Compress page payloads with XZ.
        #[arg(long)]
        xz: bool,
    },
    /// Print database metadata.
    Inform { path: PathBuf },
    /// Store a record.
    Put {
        path: PathBuf,
        key: String,
        value: String,
        /// Behaviour on an existing key.
        #[arg(long, value_enum, default_value = "over")]
        mode: PutPolicy,
    },
    /// Print the value(s) of a record.
    Get {
        path: PathBuf,
        key: String,
        /// Print every duplicate value.
        #[arg(long)]
        all: bool,
    },
    /// Remove a record value (or the whole record).
    Out {
        path: PathBuf,
        key: String,
        /// Remove every value of the key.
        #[arg(long)]
        all: bool,
    },
    /// Print records in key order.
    List {
        path: PathBuf,
        /// Stop after this many records.
        #[arg(long)]
        max: Option<usize>,
        /// Print values alongside keys.
        #[arg(long)]
        values: bool,
    },
    /// Rebuild the file compactly.
    Optimize { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum PutPolicy {
    /// Overwrite the existing value.
    Over,
    /// Keep an existing record unchanged.
    Keep,
    /// Concatenate to the existing value.
    Cat,
    /// Append as a duplicate value.
    Dup,
    /// Prepend as a duplicate value.
    Dupback,
}

impl From<PutPolicy> for DupMode {
    fn from(policy: PutPolicy) -> Self {
        match policy {
            PutPolicy::Over => DupMode::Overwrite,
            PutPolicy::Keep => DupMode::Keep,
            PutPolicy::Cat => DupMode::Cat,
            PutPolicy::Dup => DupMode::DupForward,
            PutPolicy::Dupback => DupMode::DupBackward,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(command: Command) -> ReedResult<String> {
    match command {
        Command::Create {
            path,
            lmemb,
            nmemb,
            bnum,
            apow,
            fpow,
            large,
            deflate,
            xz,
        } => {
            let defaults = BtreeOptions::default();
            let codec = if deflate {
                Codec::Deflate
            } else if xz {
                Codec::Xz
            } else {
                Codec::None
            };
            let db = Btree::new();
            db.tune(BtreeOptions {
                lmemb: lmemb.unwrap_or(defaults.lmemb),
                nmemb: nmemb.unwrap_or(defaults.nmemb),
                bnum: bnum.unwrap_or(defaults.bnum),
                apow: apow.unwrap_or(defaults.apow),
                fpow: fpow.unwrap_or(defaults.fpow),
                large,
                codec,
            })?;
            db.open(&path, OpenMode::writer_truncate())?;
            db.close()?;
            Ok(String::new())
        }
        Command::Inform { path } => {
            let db = Btree::new();
            db.open(&path, OpenMode::reader())?;
            let report = format!(
                "path: {}\nrecords: {}\nleaf pages: {}\nnode pages: {}\nbuckets: {}\nalignment: {}\nfile size: {}",
                db.path()?.display(),
                db.rnum()?,
                db.lnum()?,
                db.nnum()?,
                db.bnum()?,
                db.align()?,
                db.fsiz()?,
            );
            db.close()?;
            Ok(report)
        }
        Command::Put {
            path,
            key,
            value,
            mode,
        } => {
            let db = Btree::new();
            db.open(&path, OpenMode::writer())?;
            let result = db.put_with(key.as_bytes(), value.as_bytes(), mode.into());
            db.close()?;
            result.map(|_| String::new())
        }
        Command::Get { path, key, all } => {
            let db = Btree::new();
            db.open(&path, OpenMode::reader())?;
            let result = if all {
                db.get_list(key.as_bytes()).map(|values| {
                    values
                        .iter()
                        .map(|v| String::from_utf8_lossy(v).into_owned())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            } else {
                db.get(key.as_bytes())
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
            };
            db.close()?;
            result
        }
        Command::Out { path, key, all } => {
            let db = Btree::new();
            db.open(&path, OpenMode::writer())?;
            let result = if all {
                db.out_list(key.as_bytes())
            } else {
                db.out(key.as_bytes())
            };
            db.close()?;
            result.map(|_| String::new())
        }
        Command::List { path, max, values } => {
            let db = Btree::new();
            db.open(&path, OpenMode::reader())?;
            let mut lines = Vec::new();
            for entry in db.iter() {
                if let Some(max) = max {
                    if lines.len() >= max {
                        break;
                    }
                }
                let (key, value) = entry?;
                if values {
                    lines.push(format!(
                        "{}\t{}",
                        String::from_utf8_lossy(&key),
                        String::from_utf8_lossy(&value)
                    ));
                } else {
                    lines.push(String::from_utf8_lossy(&key).into_owned());
                }
            }
            db.close()?;
            Ok(lines.join("\n"))
        }
        Command::Optimize { path } => {
            let db = Btree::new();
            db.open(&path, OpenMode::writer())?;
            let result = db.optimize(None);
            db.close()?;
            result.map(|_| String::new())
        }
    }
}
