use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use doc_model::{
    apply_annotation_action, ActionOutcome, AnnotationAction, AnnotationDocument, ArticleId,
    ArticleUpdate, BBox, RegionId, RegionType, Settings,
};
use pagecarve_extract::{
    ArticleAssembler, ArticleExport, ExtractionConfig, ExtractionReport, RegionExtractor,
    TesseractCli,
};
use pdf_engine::{open_document, OpenSource, RenderRequest, SourceDocument};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use storage::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pagecarve-cli")]
#[command(about = "Annotate regions of scanned documents and extract their text")]
pub struct Cli {
    /// Keep sidecars under DIR (mirroring the source's parent directory)
    /// instead of next to the source document.
    #[arg(long, global = true, value_name = "DIR", conflicts_with = "central")]
    sidecar_root: Option<PathBuf>,
    /// Keep sidecars in the per-user data directory.
    #[arg(long, global = true)]
    central: bool,
    /// Extraction config file; defaults to config.json in the platform config dir.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Log more (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable document metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Create an empty annotation sidecar.
    Init {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        dpi: Option<u32>,
        #[arg(long, value_name = "LANG")]
        ocr_lang: Option<String>,
        /// Always recognize regions instead of reading the text layer.
        #[arg(long)]
        no_text_layer: bool,
        /// Replace an existing sidecar.
        #[arg(long)]
        force: bool,
    },
    /// Manage articles.
    Article {
        #[command(subcommand)]
        command: ArticleCommand,
    },
    /// Manage regions.
    Region {
        #[command(subcommand)]
        command: RegionCommand,
    },
    /// Report integrity warnings in the sidecar.
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Exit with an error when any warning is found.
        #[arg(long)]
        strict: bool,
    },
    /// Extract article text and write the export payload.
    Extract {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Only extract this article.
        #[arg(long, value_name = "ID")]
        article: Option<String>,
        /// Write the payload here instead of next to the sidecar.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print article text to stdout instead of a summary.
        #[arg(long)]
        print: bool,
    },
    /// Extract a single region and print its text with provenance.
    ExtractRegion {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "REGION_ID")]
        region: String,
        /// Recognize the region even when a text layer exists.
        #[arg(long)]
        force_ocr: bool,
    },
    /// Render a page PNG in the pixel space regions are drawn in.
    RenderPage {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        page_index: u32,
        /// Defaults to the sidecar's DPI.
        #[arg(long)]
        dpi: Option<u32>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Subcommand)]
enum ArticleCommand {
    Add {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Explicit id; the next free `A<n>` otherwise.
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    Update {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "ARTICLE_ID")]
        article: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        subtitle: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Replaces the tag set; repeat for several tags.
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        reading_hint: Option<String>,
    },
    /// Delete an article and all of its regions.
    Delete {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "ARTICLE_ID")]
        article: String,
    },
    List {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum RegionCommand {
    Add {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        page_index: u32,
        #[arg(long, value_name = "ARTICLE_ID")]
        article: String,
        /// Pixel rectangle `x,y,w,h` at the sidecar's DPI, origin top-left.
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: BBox,
        /// 1-based reading order; appended after the article's last region otherwise.
        #[arg(long)]
        order: Option<u32>,
        #[arg(long = "type", value_enum, default_value_t = RegionKind::Body)]
        region_type: RegionKind,
    },
    Delete {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "REGION_ID")]
        region: String,
    },
    /// Set a region's reading order.
    Order {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "REGION_ID")]
        region: String,
        order: u32,
    },
    /// Move a region to another article.
    Assign {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "REGION_ID")]
        region: String,
        #[arg(value_name = "ARTICLE_ID")]
        article: String,
    },
    Notes {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "REGION_ID")]
        region: String,
        notes: String,
    },
    Retype {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "REGION_ID")]
        region: String,
        #[arg(value_enum)]
        region_type: RegionKind,
    },
    /// Renumber an article's regions by page, then position.
    AutoOrder {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "ARTICLE_ID")]
        article: String,
    },
    List {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "ARTICLE_ID")]
        article: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RegionKind {
    Body,
    Header,
    Footer,
    Caption,
}

impl From<RegionKind> for RegionType {
    fn from(kind: RegionKind) -> Self {
        match kind {
            RegionKind::Body => RegionType::Body,
            RegionKind::Header => RegionType::Header,
            RegionKind::Footer => RegionType::Footer,
            RegionKind::Caption => RegionType::Caption,
        }
    }
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
    sidecar: String,
    annotated: bool,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f64,
    height: f64,
}

#[derive(Debug, Serialize)]
struct ArticleRow {
    article_id: String,
    title: String,
    author: String,
    color: String,
    reading_hint: String,
    regions: usize,
}

#[derive(Debug, Serialize)]
struct RegionRow {
    region_id: String,
    article_id: String,
    page_index: u32,
    order: u32,
    #[serde(rename = "type")]
    region_type: RegionType,
    bbox: BBox,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing(cli.verbose);

    let storage = match &cli.sidecar_root {
        Some(root) => Storage::with_root(root),
        None if cli.central => Storage::from_default_project()?,
        None => Storage::beside_source(),
    };
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Info { file } => run_info(&storage, &file),
        Commands::Init { file, dpi, ocr_lang, no_text_layer, force } => {
            let mut settings = Settings::default();
            if let Some(dpi) = dpi {
                settings.dpi = dpi;
            }
            if let Some(lang) = ocr_lang {
                settings.ocr_language = lang;
            }
            settings.prefer_text_layer = !no_text_layer;
            run_init(&storage, &file, settings, force)
        }
        Commands::Article { command } => run_article(&storage, command),
        Commands::Region { command } => run_region(&storage, command),
        Commands::Validate { file, strict } => run_validate(&storage, &file, strict),
        Commands::Extract { file, article, output, print } => run_extract(
            &storage,
            config_path,
            &file,
            article.as_deref(),
            output.as_deref(),
            print,
        ),
        Commands::ExtractRegion { file, region, force_ocr } => {
            run_extract_region(&storage, config_path, &file, &region, force_ocr)
        }
        Commands::RenderPage { file, page_index, dpi, output } => {
            run_render_page(&storage, &file, page_index, dpi, output.as_deref())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_info(storage: &Storage, file: &Path) -> Result<()> {
    let source = open_source(file)?;

    let page_count = source.page_count();
    let first_page_size_pt = if page_count > 0 {
        let size = source.page_size(0)?;
        Some(PageSizeOutput { width: size.width_pt, height: size.height_pt })
    } else {
        None
    };

    let payload = InfoOutput {
        path: file.display().to_string(),
        page_count,
        first_page_size_pt,
        sidecar: storage.sidecar_path(file).display().to_string(),
        annotated: storage.exists(file),
    };

    print_json(&payload)
}

fn run_init(storage: &Storage, file: &Path, settings: Settings, force: bool) -> Result<()> {
    ensure_pdf_exists(file)?;

    if settings.dpi == 0 {
        anyhow::bail!("--dpi must be >= 1");
    }

    if storage.exists(file) && !force {
        anyhow::bail!(
            "annotations already exist at {}; pass --force to replace them",
            storage.sidecar_path(file).display()
        );
    }

    let document = AnnotationDocument::new(file).with_settings(settings);
    let path = storage.save(file, &document).context("failed to save annotations")?;
    tracing::info!(
        sidecar = %path.display(),
        dpi = document.settings.dpi,
        "initialized annotations"
    );
    println!("{}", path.display());

    Ok(())
}

fn run_article(storage: &Storage, command: ArticleCommand) -> Result<()> {
    match command {
        ArticleCommand::Add { file, id, title } => {
            let mut document = load_or_create(storage, &file)?;
            let outcome = apply_annotation_action(
                &mut document,
                AnnotationAction::AddArticle { article_id: id.as_deref().map(ArticleId::from) },
            )?;
            if let (ActionOutcome::ArticleAdded(article_id), Some(title)) = (&outcome, title) {
                let update = ArticleUpdate { title: Some(title), ..ArticleUpdate::default() };
                document.update_article(article_id, update)?;
            }
            save(storage, &file, &document)?;
            print_outcome(&outcome)
        }
        ArticleCommand::Update {
            file,
            article,
            title,
            subtitle,
            author,
            tags,
            color,
            reading_hint,
        } => {
            let update = ArticleUpdate {
                title,
                subtitle,
                author,
                tags: (!tags.is_empty()).then(|| tags.into_iter().collect::<BTreeSet<_>>()),
                color,
                reading_hint,
            };
            let article_id = ArticleId::from(article.as_str());
            let action = AnnotationAction::UpdateArticle { article_id, update };
            mutate(storage, &file, action)
        }
        ArticleCommand::Delete { file, article } => {
            let article_id = ArticleId::from(article.as_str());
            let action = AnnotationAction::DeleteArticle { article_id };
            mutate(storage, &file, action)
        }
        ArticleCommand::List { file } => {
            let document = load_or_create(storage, &file)?;
            let rows: Vec<ArticleRow> = document
                .articles
                .iter()
                .map(|(article_id, article)| ArticleRow {
                    article_id: article_id.to_string(),
                    title: article.title.clone(),
                    author: article.author.clone(),
                    color: article.color.clone(),
                    reading_hint: article.reading_hint.clone(),
                    regions: document.regions_for_article(article_id).len(),
                })
                .collect();
            print_json(&rows)
        }
    }
}

fn run_region(storage: &Storage, command: RegionCommand) -> Result<()> {
    match command {
        RegionCommand::Add { file, page_index, article, bbox, order, region_type } => {
            let source = open_source(&file)?;
            let page_count = source.page_count();
            if page_index >= page_count {
                anyhow::bail!("page {page_index} out of range (page_count={page_count})");
            }

            let action = AnnotationAction::AddRegion {
                page_index,
                bbox,
                article_id: ArticleId::from(article.as_str()),
                order,
                region_type: region_type.into(),
            };
            mutate(storage, &file, action)
        }
        RegionCommand::Delete { file, region } => {
            mutate(storage, &file, AnnotationAction::DeleteRegion { region_id: region_id(&region) })
        }
        RegionCommand::Order { file, region, order } => mutate(
            storage,
            &file,
            AnnotationAction::SetRegionOrder { region_id: region_id(&region), order },
        ),
        RegionCommand::Assign { file, region, article } => mutate(
            storage,
            &file,
            AnnotationAction::AssignRegion {
                region_id: region_id(&region),
                article_id: ArticleId::from(article.as_str()),
            },
        ),
        RegionCommand::Notes { file, region, notes } => mutate(
            storage,
            &file,
            AnnotationAction::SetRegionNotes { region_id: region_id(&region), notes },
        ),
        RegionCommand::Retype { file, region, region_type } => mutate(
            storage,
            &file,
            AnnotationAction::SetRegionType {
                region_id: region_id(&region),
                region_type: region_type.into(),
            },
        ),
        RegionCommand::AutoOrder { file, article } => mutate(
            storage,
            &file,
            AnnotationAction::AutoOrderArticle { article_id: ArticleId::from(article.as_str()) },
        ),
        RegionCommand::List { file, article } => {
            let document = load_or_create(storage, &file)?;
            let mut regions: Vec<_> = match article.as_deref() {
                Some(article) => document.regions_for_article(&ArticleId::from(article)),
                None => document.regions().collect(),
            };
            regions.sort_by(|a, b| {
                (&a.article_id, a.page_index, a.order, &a.region_id)
                    .cmp(&(&b.article_id, b.page_index, b.order, &b.region_id))
            });

            let rows: Vec<RegionRow> = regions
                .into_iter()
                .map(|region| RegionRow {
                    region_id: region.region_id.to_string(),
                    article_id: region.article_id.to_string(),
                    page_index: region.page_index,
                    order: region.order,
                    region_type: region.region_type,
                    bbox: region.bbox,
                })
                .collect();
            print_json(&rows)
        }
    }
}

fn run_validate(storage: &Storage, file: &Path, strict: bool) -> Result<()> {
    let document = load_existing(storage, file)?;
    let warnings = document.validate();

    print_json(&json!({
        "sidecar": storage.sidecar_path(file).display().to_string(),
        "warnings": warnings,
    }))?;

    if strict && !warnings.is_empty() {
        anyhow::bail!("{} integrity warning(s) found", warnings.len());
    }

    Ok(())
}

fn run_extract(
    storage: &Storage,
    config_path: Option<&Path>,
    file: &Path,
    article: Option<&str>,
    output: Option<&Path>,
    print: bool,
) -> Result<()> {
    let document = load_existing(storage, file)?;
    let source = open_source(file)?;
    let config = load_config(config_path)?;
    let ocr = TesseractCli::from_config(&config.ocr);
    let assembler = ArticleAssembler::new(RegionExtractor::new(&*source, &ocr, &config));

    let report = match article {
        Some(article) => single_article_report(&assembler, &document, &ArticleId::from(article))?,
        None => assembler.export(&document),
    };

    let written = match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut bytes = serde_json::to_vec_pretty(&report)?;
            bytes.push(b'\n');
            fs::write(path, bytes)
                .with_context(|| format!("failed to write payload to {}", path.display()))?;
            path.to_path_buf()
        }
        None => storage.save_artifact(file, &report).context("failed to write payload")?,
    };
    tracing::info!(
        payload = %written.display(),
        articles = report.articles.len(),
        "wrote extraction payload"
    );

    if print {
        for article in &report.articles {
            println!("== {} ==", article.article_id);
            println!("{}\n", article.text);
        }
        return Ok(());
    }

    print_json(&json!({
        "payload": written.display().to_string(),
        "articles": report.articles.len(),
        "methods": report.method_counts(),
        "warnings": report.warnings.len(),
    }))
}

fn single_article_report(
    assembler: &ArticleAssembler<'_>,
    document: &AnnotationDocument,
    article_id: &ArticleId,
) -> Result<ExtractionReport> {
    let built = assembler.build_article_text(document, article_id)?;
    let article = document.articles.get(article_id).cloned().unwrap_or_default();

    Ok(ExtractionReport {
        source_document_path: document.source_document_path().to_path_buf(),
        dpi: document.settings.dpi,
        articles: vec![ArticleExport {
            article_id: built.article_id,
            article,
            text: built.text,
            regions_metadata: built.regions_metadata,
            warnings: built.warnings,
        }],
        warnings: Vec::new(),
    })
}

fn run_extract_region(
    storage: &Storage,
    config_path: Option<&Path>,
    file: &Path,
    region: &str,
    force_ocr: bool,
) -> Result<()> {
    let document = load_existing(storage, file)?;
    let source = open_source(file)?;
    let config = load_config(config_path)?;
    let ocr = TesseractCli::from_config(&config.ocr);
    let extractor = RegionExtractor::new(&*source, &ocr, &config);

    let result = extractor
        .extract_by_id(&document, &region_id(region), force_ocr)
        .with_context(|| format!("failed to extract region {region}"))?;

    print_json(&result)
}

fn run_render_page(
    storage: &Storage,
    file: &Path,
    page_index: u32,
    dpi: Option<u32>,
    output: Option<&Path>,
) -> Result<()> {
    let source = open_source(file)?;
    let dpi = match dpi {
        Some(dpi) => dpi,
        None => load_or_create(storage, file)?.settings.dpi,
    };
    if dpi == 0 {
        anyhow::bail!("--dpi must be >= 1");
    }

    let image = source
        .render_page(RenderRequest::at_dpi(page_index, dpi))
        .with_context(|| format!("failed to render page {page_index}"))?;

    let output =
        output.map(ToOwned::to_owned).unwrap_or_else(|| default_render_output(file, page_index));

    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    image
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;

    println!("{}", output.display());

    Ok(())
}

/// Loads (or starts) the sidecar for `file`, applies `action` and saves.
fn mutate(storage: &Storage, file: &Path, action: AnnotationAction) -> Result<()> {
    let mut document = load_or_create(storage, file)?;
    let outcome = apply_annotation_action(&mut document, action)?;
    save(storage, file, &document)?;
    print_outcome(&outcome)
}

fn print_outcome(outcome: &ActionOutcome) -> Result<()> {
    let payload = match outcome {
        ActionOutcome::ArticleAdded(article_id) => json!({ "article_id": article_id }),
        ActionOutcome::ArticleDeleted { removed_regions } => {
            json!({ "deleted": true, "removed_regions": removed_regions })
        }
        ActionOutcome::RegionAdded(region_id) => json!({ "region_id": region_id }),
        ActionOutcome::RegionDeleted(region) => json!({ "deleted": region.region_id }),
        ActionOutcome::RegionAssigned { order } => json!({ "order": order }),
        ActionOutcome::ArticleUpdated
        | ActionOutcome::RegionUpdated
        | ActionOutcome::ArticleReordered => json!({ "updated": true }),
    };

    print_json(&payload)
}

fn load_or_create(storage: &Storage, file: &Path) -> Result<AnnotationDocument> {
    ensure_pdf_exists(file)?;
    storage.load_or_create(file, Settings::default()).context("failed to load annotations")
}

fn load_existing(storage: &Storage, file: &Path) -> Result<AnnotationDocument> {
    ensure_pdf_exists(file)?;
    storage.load(file).context("failed to load annotations")
}

fn save(storage: &Storage, file: &Path, document: &AnnotationDocument) -> Result<()> {
    storage.save(file, document).context("failed to save annotations")?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ExtractionConfig> {
    ExtractionConfig::load(path).context("failed to load extraction config")
}

fn open_source(file: &Path) -> Result<Box<dyn SourceDocument>> {
    ensure_pdf_exists(file)?;
    open_document(OpenSource::from(file)).context("failed to open PDF")
}

fn region_id(raw: &str) -> RegionId {
    RegionId::from(raw)
}

fn print_json<T: Serialize + ?Sized>(payload: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(payload)?;
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

fn parse_bbox(raw: &str) -> Result<BBox, String> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|_| format!("`{part}` is not a number")))
        .collect::<Result<_, _>>()?;

    match values.as_slice() {
        [x, y, w, h] => BBox::new(*x, *y, *w, *h).map_err(|err| err.to_string()),
        _ => Err(format!("expected x,y,w,h but got {} value(s)", values.len())),
    }
}

fn default_render_output(file: &Path, page_index: u32) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("page");

    file.with_file_name(format!("{stem}-page-{page_index}.png"))
}
