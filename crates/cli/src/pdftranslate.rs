//! pdftranslate - Translate PDF files while preserving their layout
//!
//! Reads one or more PDF files, translates the ordinary text on each
//! page and writes two variants next to each input: `<stem>-mono.pdf`
//! (translated only) and `<stem>-dual.pdf` (original and translated
//! pages interleaved).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{ArgAction, Parser};
use rosetta_core::{
    DirFontSource, DocumentTranslator, FontSource, IdentityTranslator, LayoutModel, NoFontSource,
    Rasterizer, SolidRasterizer, TranslateOptions, TranslationBackend, WholePageModel,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Translate PDF files while preserving their layout.
#[derive(Parser, Debug)]
#[command(name = "pdftranslate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// One or more paths to PDF files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Source language code
    #[arg(long = "from", default_value = "en")]
    source_lang: String,

    /// Target language code
    #[arg(long = "to", default_value = "zh")]
    target_lang: String,

    /// Number of page workers (clamped to 1..=8)
    #[arg(short = 'j', long, default_value = "4")]
    threads: usize,

    /// A comma-separated list of pages or ranges to translate
    /// (1-indexed, e.g. "1,3-5"); all pages when omitted
    #[arg(short = 'p', long)]
    pages: Option<String>,

    /// Directory containing substitute font files
    #[arg(long = "font-dir")]
    font_dir: Option<PathBuf>,

    /// Substitute font file name inside the font directory, overriding
    /// the target-language default
    #[arg(long)]
    font: Option<String>,

    /// Scale factor applied to substituted font sizes
    #[arg(long = "font-scale", default_value = "1.0")]
    font_scale: f64,

    /// Maximum characters per translation request
    #[arg(long = "chunk", default_value = "2000")]
    chunk_limit: usize,

    /// Path to an ONNX layout detection model
    #[cfg(feature = "onnx")]
    #[arg(long)]
    model: Option<PathBuf>,

    /// Abort a page on unknown content operators instead of skipping them
    #[arg(long, action = ArgAction::SetTrue)]
    strict: bool,

    /// Keep the full substitute font instead of subsetting it
    #[arg(long = "no-subset", action = ArgAction::SetTrue)]
    no_subset: bool,

    /// Directory where output files are written (defaults to each
    /// input's directory)
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Use debug logging level
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    debug: bool,
}

/// Parses "1,3-5" into 1-based page numbers.
fn parse_pages(expr: &str) -> anyhow::Result<Vec<usize>> {
    let mut pages = Vec::new();
    for part in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().context("invalid page range")?;
                let hi: usize = hi.trim().parse().context("invalid page range")?;
                if lo == 0 || hi < lo {
                    bail!("invalid page range: {part}");
                }
                pages.extend(lo..=hi);
            }
            None => {
                let n: usize = part.parse().context("invalid page number")?;
                if n == 0 {
                    bail!("page numbers are 1-indexed");
                }
                pages.push(n);
            }
        }
    }
    pages.sort_unstable();
    pages.dedup();
    Ok(pages)
}

fn output_path(input: &Path, dir: Option<&Path>, suffix: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let dir = dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{stem}-{suffix}.pdf"))
}

fn build_translator(args: &Args) -> anyhow::Result<DocumentTranslator> {
    let layout: Arc<dyn LayoutModel> = build_layout(args)?;
    let rasterizer: Arc<dyn Rasterizer> = Arc::new(SolidRasterizer);
    let backend: Arc<dyn TranslationBackend> = Arc::new(IdentityTranslator);
    let fonts: Arc<dyn FontSource> = match &args.font_dir {
        Some(dir) => Arc::new(DirFontSource::new(dir.clone())),
        None => Arc::new(NoFontSource),
    };
    Ok(DocumentTranslator::new(layout, rasterizer, backend, fonts))
}

#[cfg(feature = "onnx")]
fn build_layout(args: &Args) -> anyhow::Result<Arc<dyn LayoutModel>> {
    match &args.model {
        Some(path) => {
            let model = rosetta_core::layout::onnx::OnnxLayoutModel::load(path)
                .with_context(|| format!("failed to load model {}", path.display()))?;
            Ok(Arc::new(model))
        }
        None => Ok(Arc::new(WholePageModel)),
    }
}

#[cfg(not(feature = "onnx"))]
fn build_layout(_args: &Args) -> anyhow::Result<Arc<dyn LayoutModel>> {
    Ok(Arc::new(WholePageModel))
}

fn process_file(
    translator: &DocumentTranslator,
    path: &Path,
    args: &Args,
    options: &TranslateOptions,
) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let result = translator
        .translate_document(&bytes, options)
        .with_context(|| format!("failed to translate {}", path.display()))?;
    if result.fallback_units > 0 {
        info!(
            file = %path.display(),
            units = result.fallback_units,
            "some units kept their source text"
        );
    }

    let mono = output_path(path, args.output_dir.as_deref(), "mono");
    let dual = output_path(path, args.output_dir.as_deref(), "dual");
    std::fs::write(&mono, &result.mono)
        .with_context(|| format!("failed to write {}", mono.display()))?;
    std::fs::write(&dual, &result.dual)
        .with_context(|| format!("failed to write {}", dual.display()))?;
    info!(mono = %mono.display(), dual = %dual.display(), "wrote output");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let pages = args.pages.as_deref().map(parse_pages).transpose()?;
    let options = TranslateOptions {
        source_lang: args.source_lang.clone(),
        target_lang: args.target_lang.clone(),
        threads: args.threads,
        chunk_limit: args.chunk_limit,
        font_override: args.font.clone(),
        font_scale: args.font_scale,
        skip_subset: args.no_subset,
        strict: args.strict,
        pages,
        ..TranslateOptions::default()
    };

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let translator = build_translator(&args)?;
    for path in &args.files {
        if !path.exists() {
            bail!("file not found: {}", path.display());
        }
        process_file(&translator, path, &args, &options)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pages() {
        assert_eq!(parse_pages("1,3-5").unwrap(), vec![1, 3, 4, 5]);
        assert_eq!(parse_pages("4, 2, 2").unwrap(), vec![2, 4]);
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("5-2").is_err());
    }

    #[test]
    fn test_output_path() {
        let p = output_path(Path::new("/tmp/report.pdf"), None, "mono");
        assert_eq!(p, PathBuf::from("/tmp/report-mono.pdf"));
        let p = output_path(Path::new("report.pdf"), Some(Path::new("out")), "dual");
        assert_eq!(p, PathBuf::from("out/report-dual.pdf"));
    }
}
