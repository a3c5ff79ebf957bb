use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;
use structopt::*;

use orbpak::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "orbprobe",
    about = "Examines an ORBPAK archive, checking its manifest and every entry's hash"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Prints the entries in the archive instead of reading them.
    #[structopt(short, long)]
    list: bool,

    /// Writes every entry into the given directory once it checks out.
    #[structopt(short = "x", long)]
    extract: Option<PathBuf>,

    #[structopt(name("ORBPAK file"))]
    archive_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    info!("Memory mapping {:#?}", &args.archive_path);
    let archive_file = File::open(&args.archive_path).context("Couldn't open archive")?;
    let mapping = unsafe { Mmap::map(&archive_file).context("Couldn't mmap archive")? };

    let mut archive = OrbArchive::from_bytes(&mapping).context("Couldn't load archive")?;

    if args.list {
        print_entries(&archive);
        return Ok(());
    }

    if archive.options().contains(Options::MANIFEST_HASH) && archive.hash_type() != HashType::None
    {
        archive
            .verify_manifest()
            .context("Manifest check failed")?;
        info!("Manifest hash OK");
    } else {
        warn!("No manifest hash; only checking entries one by one");
    }

    let paths: Vec<String> = archive.files().map(str::to_owned).collect();
    read_entries(&mapping, &paths, args.extract.as_deref())
}

fn print_entries<R: Read + Seek>(archive: &OrbArchive<R>) {
    println!(
        "ORBPAK v{}, options {:#x}, {} hashes",
        archive.spec_version(),
        archive.options().bits(),
        archive.hash_type()
    );
    for entry in archive.entries() {
        println!(
            "{:>10} {:>10}  {}",
            entry.length, entry.stored_length, entry.path
        );
    }
}

/// Reads every entry (checking its hash), optionally writing it out.
///
/// Each worker thread gets its own handle on the mapping,
/// since reading moves a handle's position.
fn read_entries(mapping: &[u8], paths: &[String], extract_to: Option<&Path>) -> Result<()> {
    paths.par_iter().try_for_each_init(
        || OrbArchive::from_bytes(mapping),
        |archive, path| -> Result<()> {
            let archive = archive
                .as_mut()
                .map_err(|e| anyhow!("Couldn't load archive: {}", e))?;
            let data = archive
                .read(path)
                .with_context(|| format!("Couldn't read {}", path))?;
            debug!("{}: {} bytes", path, data.len());

            if let Some(dir) = extract_to {
                extract(dir, path, &data)?;
            }
            Ok(())
        },
    )?;
    info!("All {} entries OK", paths.len());
    Ok(())
}

fn extract(dir: &Path, entry_path: &str, data: &[u8]) -> Result<()> {
    // Entry names come from the archive, so don't let them wander off.
    let relative = Path::new(entry_path);
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        bail!("Refusing to extract {} outside of {}", entry_path, dir.display());
    }

    let destination = dir.join(relative);
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Couldn't create directory {}", parent.display()))?;
    }
    fs::write(&destination, data)
        .with_context(|| format!("Couldn't create file {}", destination.display()))
}
