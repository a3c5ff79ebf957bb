use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use log::*;
use structopt::*;

use orbpak::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "orbpack",
    about = "Packs the files listed in a manifest into an ORBPAK archive"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Hash for each entry and the manifest: none, crc32, sha1, or sha256
    #[structopt(long, default_value = "sha256")]
    hash: HashType,

    /// Store entries as-is instead of DEFLATEing them.
    #[structopt(long)]
    no_compress: bool,

    /// Don't end the archive with a manifest hash.
    #[structopt(long)]
    no_manifest: bool,

    /// Text file listing one path per line, relative to the manifest itself.
    /// Blank lines and lines starting with # are skipped.
    #[structopt(name("manifest"))]
    manifest: Utf8PathBuf,

    #[structopt(name("output"))]
    output: Utf8PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let mut options = Options::NONE;
    if !args.no_compress {
        options |= Options::COMPRESSED;
    }
    if !args.no_manifest {
        options |= Options::MANIFEST_HASH;
    }

    let builder = pack(&args.manifest, options, args.hash)?;
    save_atomically(&builder, &args.output)?;
    info!("Packed {} entries into {}", builder.len(), args.output);
    Ok(())
}

/// Reads every file the manifest lists into a new builder.
fn pack(manifest: &Utf8Path, options: Options, hash_type: HashType) -> Result<OrbBuilder> {
    let listing = fs::read_to_string(manifest)
        .with_context(|| format!("Couldn't read manifest {}", manifest))?;
    let base = manifest.parent().unwrap_or_else(|| Utf8Path::new("."));

    let mut builder = OrbBuilder::new(options, hash_type);
    for (line_number, line) in listing.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry_path = line.replace('\\', "/");
        let source = base.join(&entry_path);
        debug!("{} <- {}", entry_path, source);
        let data = fs::read(&source).with_context(|| {
            format!(
                "Couldn't read {} (line {} of {})",
                source,
                line_number + 1,
                manifest
            )
        })?;
        builder
            .add_entry(&entry_path, &data)
            .with_context(|| format!("Couldn't add {}", entry_path))?;
    }

    if builder.is_empty() {
        warn!("{} doesn't list any files", manifest);
    }
    Ok(builder)
}

/// Saves to a temporary file next to `output`, then renames it into place,
/// so an interrupted run never leaves a truncated archive behind.
fn save_atomically(builder: &OrbBuilder, output: &Utf8Path) -> Result<()> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("Couldn't create directory {}", dir))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Couldn't create a temporary file in {}", dir))?;
    builder
        .save(temp.as_file_mut())
        .context("Couldn't write archive")?;
    temp.persist(output)
        .with_context(|| format!("Couldn't move archive into place at {}", output))?;
    Ok(())
}
