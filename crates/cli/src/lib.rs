use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lopdf::{Document, Object};
use markbook_core::{package_report, Deliverable, FinalizeContext, NamedDocument};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "markbook-cli")]
#[command(about = "Markbook report tools")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Bake an annotation file into a copy of the PDF.
    Finalize {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Annotation JSON; current envelope and old bare-array files both work.
        #[arg(long)]
        annotations: PathBuf,
        /// Name used for the text signature fallback.
        #[arg(long, default_value = "")]
        signer: String,
        /// Signature image to stamp instead of the text fallback.
        #[arg(long)]
        signature_image: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Merge a finalized report with attachments into one deliverable.
    Package {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Attachment PDF; repeat for several.
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
        #[arg(long)]
        class: String,
        /// Reporting-period qualifier; defaults to today's date.
        #[arg(long)]
        qualifier: Option<String>,
        /// Directory for the deliverable; defaults to the input's directory.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Finalize { file, annotations, signer, signature_image, output } => {
            run_finalize(&file, &annotations, &signer, signature_image.as_deref(), output)
        }
        Commands::Package { file, attachments, class, qualifier, out_dir } => {
            run_package(&file, &attachments, &class, qualifier.as_deref(), out_dir)
        }
        Commands::Info { file } => run_info(&file),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_finalize(
    file: &Path,
    annotations: &Path,
    signer: &str,
    signature_image: Option<&Path>,
    output: Option<PathBuf>,
) -> Result<()> {
    ensure_pdf_exists(file)?;

    let original = fs::read(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let annotation_json = fs::read_to_string(annotations)
        .with_context(|| format!("failed to read {}", annotations.display()))?;
    let annotations = doc_model::legacy::parse_annotation_file(&annotation_json)
        .context("failed to parse annotation file")?;

    let signature_image = match signature_image {
        Some(path) => Some(
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let ctx = FinalizeContext { signer_name: signer.to_owned(), signature_image };
    let flattened = markbook_core::flatten_document(&original, &annotations, &ctx)
        .context("failed to finalize PDF")?;

    let output = output.unwrap_or_else(|| default_finalize_output(file));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&output, flattened)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("{}", output.display());
    Ok(())
}

fn run_package(
    file: &Path,
    attachments: &[PathBuf],
    class: &str,
    qualifier: Option<&str>,
    out_dir: Option<PathBuf>,
) -> Result<()> {
    ensure_pdf_exists(file)?;

    let primary = NamedDocument {
        name: file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("report.pdf")
            .to_owned(),
        bytes: fs::read(file).with_context(|| format!("failed to read {}", file.display()))?,
    };

    let mut named_attachments = Vec::with_capacity(attachments.len());
    for path in attachments {
        ensure_pdf_exists(path)?;
        named_attachments.push(NamedDocument {
            name: path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("attachment.pdf")
                .to_owned(),
            bytes: fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        });
    }

    let qualifier = match qualifier {
        Some(value) => value.to_owned(),
        None => chrono::Local::now().format("%Y-%m-%d").to_string(),
    };
    let base_name = markbook_core::deliverable_name(class, &qualifier);

    let deliverable = package_report(primary, named_attachments, &base_name)
        .context("failed to package report")?;

    let out_dir = out_dir
        .or_else(|| file.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&out_dir)?;

    let output = out_dir.join(deliverable.name());
    fs::write(&output, deliverable.bytes())
        .with_context(|| format!("failed to write {}", output.display()))?;

    match deliverable {
        Deliverable::Pdf(_) => println!("{}", output.display()),
        Deliverable::Bundle(_) => {
            println!("{}", output.display());
            eprintln!("some attachments could not be merged; see Attachments/ in the bundle");
        }
    }
    Ok(())
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let bytes = fs::read(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let doc = Document::load_mem(&bytes).context("failed to open PDF")?;

    let pages = doc.get_pages();
    let first_page_size_pt = pages
        .get(&1)
        .and_then(|&page_id| media_box_size(&doc, page_id))
        .map(|(width, height)| PageSizeOutput { width, height });

    let payload = InfoOutput {
        path: file.display().to_string(),
        page_count: pages.len() as u32,
        first_page_size_pt,
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");
    Ok(())
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn default_finalize_output(file: &Path) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("report");

    file.with_file_name(format!("{stem}-final.pdf"))
}

fn media_box_size(doc: &Document, page_id: lopdf::ObjectId) -> Option<(f32, f32)> {
    let mut current = Some(page_id);
    let mut depth = 0;

    while let Some(id) = current {
        if depth > 32 {
            return None;
        }
        let dict = doc.get_dictionary(id).ok()?;
        if let Ok(entry) = dict.get(b"MediaBox") {
            let resolved = match entry {
                Object::Reference(rid) => doc.get_object(*rid).ok()?,
                other => other,
            };
            let array = resolved.as_array().ok()?;
            if array.len() != 4 {
                return None;
            }
            let x0 = array[0].as_float().ok()?;
            let y0 = array[1].as_float().ok()?;
            let x1 = array[2].as_float().ok()?;
            let y1 = array[3].as_float().ok()?;
            return Some(((x1 - x0).abs(), (y1 - y0).abs()));
        }
        current = dict.get(b"Parent").ok().and_then(|obj| obj.as_reference().ok());
        depth += 1;
    }
    None
}
