mod cli;

use bmap_format::{ChecksumKind, human_size, human_time};
use bmap_image::{BmapGenerator, GenerateOptions, ImageSource};
use bmaptool::{
    BmapDocument, ConsoleProgress, CopyEngine, CopyOptions, SilentProgress, Target,
    discover_bmap, open_bmap,
};
use clap::Parser;
use cli::{Cli, Command};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Top-level application errors for bmaptool.
#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("cannot generate the bmap of '{}'", path.display()))]
    Generate {
        path: PathBuf,
        source: bmap_image::GenerateError,
    },

    #[snafu(display("cannot create output file '{}'", path.display()))]
    CreateOutput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "bmap file not found for '{}', please use the --nobmap option to copy without a bmap",
        image.display()
    ))]
    NoBmap { image: PathBuf },

    #[snafu(display("bmap file '{}' is the image itself", path.display()))]
    BmapIsImage { path: PathBuf },

    #[snafu(display("failed to load bmap"))]
    OpenBmap { source: bmaptool::OpenBmapError },

    #[snafu(display("failed to open image"))]
    OpenImage { source: bmap_image::SourceError },

    #[snafu(display("failed to open destination"))]
    OpenTarget { source: bmaptool::TargetError },

    #[snafu(display("failed to copy '{}' to '{}'", image.display(), dest.display()))]
    Copy {
        image: PathBuf,
        dest: PathBuf,
        source: bmaptool::CopyError,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[snafu::report]
fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.quiet, cli.debug);

    match cli.command {
        Command::Create {
            image,
            output,
            no_checksum,
            checksum,
        } => {
            let checksum = (!no_checksum).then(|| ChecksumKind::from(checksum));
            cmd_create(&image, output.as_deref(), checksum)
        }
        Command::Copy {
            image,
            dest,
            bmap,
            nobmap,
            no_verify,
            no_sync,
        } => {
            let options = CopyOptions {
                verify: !no_verify,
                sync: !no_sync,
            };
            cmd_copy(&image, &dest, bmap, nobmap, options, cli.quiet)
        }
    }
}

fn init_logging(quiet: bool, debug: bool) {
    let level = if quiet {
        "warn"
    } else if debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_create(image: &Path, output: Option<&Path>, checksum: Option<ChecksumKind>) -> Result<()> {
    let generator = BmapGenerator::open(image).context(GenerateSnafu { path: image })?;
    let options = GenerateOptions { checksum };

    let report = match output {
        Some(path) => {
            let file = File::create(path).context(CreateOutputSnafu { path })?;
            generator.generate_to(options, BufWriter::new(file))
        }
        None => generator.generate_to(options, std::io::stdout().lock()),
    }
    .context(GenerateSnafu { path: image })?;

    let header = report.header;

    info!(
        strategy = %report.strategy,
        "{} blocks of size {} ({}), mapped {} blocks",
        header.blocks_count,
        header.block_size,
        human_size(header.image_size),
        report.mapped_blocks_count,
    );

    if report.mapped_blocks_count == header.blocks_count {
        warn!(
            "all {} blocks of '{}' are mapped, was the image handled incorrectly and holes were expanded?",
            header.blocks_count,
            image.display()
        );
    }

    Ok(())
}

fn cmd_copy(
    image: &Path,
    dest: &Path,
    bmap: Option<PathBuf>,
    nobmap: bool,
    options: CopyOptions,
    quiet: bool,
) -> Result<()> {
    let bmap_path = match (bmap, nobmap) {
        (_, true) => None,
        (Some(path), false) => Some(path),
        (None, false) => Some(discover_bmap(image).context(NoBmapSnafu { image })?),
    };

    if let Some(path) = &bmap_path {
        ensure!(!same_file(path, image), BmapIsImageSnafu { path });
    }

    warn_about_destination(dest);

    let doc = bmap_path
        .as_deref()
        .map(open_bmap)
        .transpose()
        .context(OpenBmapSnafu)?;

    match (&doc, &bmap_path) {
        (Some(doc), Some(path)) => describe_bmap(doc, path, options.verify),
        _ => info!("no bmap given, copying the entire image"),
    }

    let mut source = ImageSource::open(image).context(OpenImageSnafu)?;
    let mut target = Target::open(dest).context(OpenTargetSnafu)?;

    info!("copying image '{}' to '{}'", image.display(), dest.display());

    let result = if quiet {
        CopyEngine::new(doc.as_ref(), SilentProgress, options).copy(&mut source, &mut target)
    } else {
        CopyEngine::new(doc.as_ref(), ConsoleProgress::new(), options).copy(&mut source, &mut target)
    };
    let report = result.context(CopySnafu { image, dest })?;

    if doc.is_none() {
        info!(
            "{} blocks of size {} ({}), mapped {} blocks ({} or {:.1}%)",
            report.blocks_count,
            report.block_size,
            human_size(report.image_size),
            report.mapped_blocks_count,
            human_size(report.mapped_size()),
            report.mapped_percent(),
        );
    }

    let secs = report.elapsed.as_secs_f64();

    info!("copying time: {}", human_time(secs));

    if secs > 0.0 {
        let speed = (report.bytes_written as f64 / secs) as u64;
        info!("average copying speed: {}/sec", human_size(speed));
    }

    Ok(())
}

fn describe_bmap(doc: &BmapDocument, path: &Path, verify: bool) {
    info!("block map format version {}", doc.version());
    info!(
        "{} blocks of size {} ({}), mapped {} blocks ({} or {:.1}%)",
        doc.blocks_count(),
        doc.block_size(),
        human_size(doc.image_size()),
        doc.mapped_blocks_count(),
        human_size(doc.mapped_size().min(doc.image_size())),
        doc.mapped_percent(),
    );
    info!(bmap = %path.display(), "using bmap file");

    if verify && doc.ranges().iter().all(|r| r.checksum().is_none()) {
        info!("the bmap has no checksums, data will not be verified");
    }
}

fn warn_about_destination(dest: &Path) {
    if !dest.starts_with("/dev") {
        return;
    }

    match std::fs::metadata(dest) {
        Err(_) => warn!(
            "'{}' does not exist, a regular file will be created",
            dest.display()
        ),
        Ok(meta) if meta.is_file() => warn!(
            "'{}' is a regular file, not a block device",
            dest.display()
        ),
        Ok(_) => {}
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
