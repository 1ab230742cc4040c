use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use similar::TextDiff;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use wikicurate_core::categories::{
    add_category, category_links, remove_category, remove_duplicate_categories,
};
use wikicurate_core::category_graph::{CategoryGraph, PRUNE_LOAD_DEPTH, PageSource};
use wikicurate_core::config::{CurateConfig, DEFAULT_CONFIG_PATH, load_config};
use wikicurate_core::curation::{CurationRequest, curate_page};
use wikicurate_core::dates::{self, DatePrecision, DateRange};
use wikicurate_core::license::CountryCode;
use wikicurate_core::malformed::report_malformed_pages;
use wikicurate_core::mapping::{
    CategoryOverride, CreatorOverride, DateOverride, ManualMapping, MappingValue,
};
use wikicurate_core::markup::{MarkupSpan, scan, walk};
use wikicurate_core::mediawiki::{MediaWikiClient, MediaWikiClientConfig};
use wikicurate_core::progress::{Heartbeat, ProgressCounter};
use wikicurate_core::template::{
    ParameterKey, extract_template, get_parameter, remove_template, set_template_parameter,
};
use wikicurate_core::title::PageTitle;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(
    name = "wikicurate",
    version,
    about = "Wikitext curation: markup checks, category graph, dates and licensing"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Raise log verbosity (-v info, -vv debug)")]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy)]
struct OutputOptions {
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "List the template and link spans of a page")]
    Scan(FileArgs),
    #[command(about = "Report *.wiki files whose markup does not balance")]
    Malformed(MalformedArgs),
    Template(TemplateArgs),
    Category(CategoryArgs),
    #[command(about = "Normalize an archival date string")]
    Date(DateArgs),
    #[command(about = "Decide the public-domain license tag for a work")]
    License(LicenseArgs),
    Graph(GraphArgs),
    #[command(about = "Apply date, license and category curation to a page")]
    Curate(CurateArgs),
    Mapping(MappingArgs),
}

#[derive(Debug, Args)]
struct FileArgs {
    file: PathBuf,
}

#[derive(Debug, Args)]
struct WriteArgs {
    #[arg(long, help = "Write the result back instead of printing a diff")]
    write: bool,
}

#[derive(Debug, Args)]
struct MalformedArgs {
    dir: PathBuf,
}

#[derive(Debug, Args)]
struct TemplateArgs {
    #[command(subcommand)]
    command: TemplateSubcommand,
}

#[derive(Debug, Subcommand)]
enum TemplateSubcommand {
    Get {
        file: PathBuf,
        template: String,
        #[arg(help = "Parameter name, or a number for a positional parameter")]
        parameter: String,
    },
    Set {
        file: PathBuf,
        template: String,
        parameter: String,
        value: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    Remove {
        file: PathBuf,
        template: String,
        #[command(flatten)]
        write: WriteArgs,
    },
}

#[derive(Debug, Args)]
struct CategoryArgs {
    #[command(subcommand)]
    command: CategorySubcommand,
}

#[derive(Debug, Subcommand)]
enum CategorySubcommand {
    List {
        file: PathBuf,
    },
    Add {
        file: PathBuf,
        #[arg(required = true)]
        names: Vec<String>,
        #[command(flatten)]
        write: WriteArgs,
    },
    Remove {
        file: PathBuf,
        #[arg(required = true)]
        names: Vec<String>,
        #[command(flatten)]
        write: WriteArgs,
    },
    Dedupe {
        file: PathBuf,
        #[command(flatten)]
        write: WriteArgs,
    },
}

#[derive(Debug, Args)]
struct DateArgs {
    raw: String,
}

#[derive(Debug, Args)]
struct LicenseArgs {
    #[arg(long, help = "Publication date, in any form the date parser accepts")]
    date: String,
    #[arg(long, value_name = "YEAR")]
    death_year: Option<i32>,
    #[arg(long, help = "Publication country (ISO alpha-3, alpha-2 or English name)")]
    country: String,
    #[arg(long, help = "Fall back to the anonymous-author rule")]
    anonymous: bool,
}

#[derive(Debug, Args)]
struct GraphArgs {
    #[command(subcommand)]
    command: GraphSubcommand,
}

#[derive(Debug, Subcommand)]
enum GraphSubcommand {
    #[command(about = "Fetch categories and their parents into the cache")]
    Load {
        #[arg(required = true)]
        categories: Vec<String>,
        #[arg(long, default_value_t = PRUNE_LOAD_DEPTH)]
        depth: usize,
    },
    #[command(about = "List cached ancestors of a category")]
    Ancestors { category: String },
    #[command(about = "Drop categories that are ancestors of others in the list")]
    Prune {
        #[arg(required = true)]
        categories: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct CurateArgs {
    file: PathBuf,
    #[arg(long, help = "Override the date read from the page")]
    date: Option<String>,
    #[arg(long, value_name = "YEAR")]
    death_year: Option<i32>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long, help = "Fall back to the anonymous-author rule")]
    anonymous: bool,
    #[arg(long = "add", value_name = "CATEGORY")]
    add: Vec<String>,
    #[arg(long = "remove", value_name = "CATEGORY")]
    remove: Vec<String>,
    #[arg(long, help = "Keep less specific categories")]
    no_prune: bool,
    #[command(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Args)]
struct MappingArgs {
    #[command(subcommand)]
    command: MappingSubcommand,
}

#[derive(Debug, Subcommand)]
enum MappingSubcommand {
    #[command(about = "List entries still waiting for a value")]
    Pending {
        file: PathBuf,
        #[arg(long, value_enum)]
        kind: MappingKind,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MappingKind {
    Category,
    Creator,
    Date,
}

#[derive(Debug, Serialize)]
struct SpanRow {
    kind: String,
    name: String,
    start: usize,
    end: usize,
    depth: usize,
}

#[derive(Debug, Serialize)]
struct DateOutput<'a> {
    raw: &'a str,
    range: DateRange,
    precision: DatePrecision,
}

#[derive(Debug, Serialize)]
struct PendingRow<'a> {
    raw: &'a str,
    from_pages: &'a [String],
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = OutputOptions { json: cli.json };
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = load_config(&config_path)?;

    match cli.command {
        Commands::Scan(args) => run_scan(output, &args.file),
        Commands::Malformed(args) => run_malformed(output, &args.dir),
        Commands::Template(args) => run_template(output, args.command),
        Commands::Category(args) => run_category(output, args.command),
        Commands::Date(args) => run_date(output, &args.raw),
        Commands::License(args) => run_license(output, &config, args),
        Commands::Graph(args) => run_graph(output, &config, args.command),
        Commands::Curate(args) => run_curate(output, &config, args),
        Commands::Mapping(MappingArgs {
            command: MappingSubcommand::Pending { file, kind },
        }) => match kind {
            MappingKind::Category => run_mapping_pending::<CategoryOverride>(output, &file),
            MappingKind::Creator => run_mapping_pending::<CreatorOverride>(output, &file),
            MappingKind::Date => run_mapping_pending::<DateOverride>(output, &file),
        },
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_scan(output: OutputOptions, file: &Path) -> Result<()> {
    let text = read_page(file)?;
    let spans = match scan(&text) {
        Ok(spans) => spans,
        Err(error) => {
            let (line, column) = error.line_and_column(&text);
            bail!("{}:{line}:{column}: {error}", normalize_path(file));
        }
    };
    let rows = walk(&spans)
        .into_iter()
        .map(span_row)
        .collect::<Vec<_>>();

    if output.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!("scan {}", normalize_path(file));
    println!("spans.top_level: {}", spans.len());
    println!("spans.total: {}", rows.len());
    for row in &rows {
        println!(
            "{}{} {} [{}..{}]",
            "  ".repeat(row.depth),
            row.kind,
            row.name,
            row.start,
            row.end
        );
    }
    Ok(())
}

fn span_row(span: &MarkupSpan) -> SpanRow {
    SpanRow {
        kind: span.kind.to_string(),
        name: span.name.clone(),
        start: span.start,
        end: span.end,
        depth: span.depth,
    }
}

fn run_malformed(output: OutputOptions, dir: &Path) -> Result<()> {
    let progress = ProgressCounter::new();
    let heartbeat = Heartbeat::spawn(progress.clone(), HEARTBEAT_INTERVAL);
    let report = report_malformed_pages(dir, Some(&progress));
    heartbeat.stop();
    let report = report?;

    if output.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("malformed {}", normalize_path(dir));
    println!("pages.scanned: {}", report.scanned);
    println!("pages.malformed: {}", report.malformed.len());
    println!("pages.unreadable: {}", report.unreadable.len());
    for page in &report.malformed {
        println!(
            "{}:{}:{}: {} {} ({})",
            page.path, page.line, page.column, page.kind, page.problem, page.title
        );
    }
    for page in &report.unreadable {
        println!("{}: unreadable ({})", page.path, page.reason);
    }
    Ok(())
}

fn run_template(output: OutputOptions, command: TemplateSubcommand) -> Result<()> {
    match command {
        TemplateSubcommand::Get {
            file,
            template,
            parameter,
        } => {
            let text = read_page(&file)?;
            let found = extract_template(&text, &template)?
                .with_context(|| format!("{template} not found in {}", normalize_path(&file)))?;
            let value = get_parameter(&found.body, &ParameterKey::parse(&parameter))?;
            if output.json {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                match value {
                    Some(value) => println!("{value}"),
                    None => println!("<unset>"),
                }
            }
            Ok(())
        }
        TemplateSubcommand::Set {
            file,
            template,
            parameter,
            value,
            write,
        } => {
            let text = read_page(&file)?;
            let updated =
                set_template_parameter(&text, &template, &ParameterKey::parse(&parameter), &value)?
                    .with_context(|| {
                        format!("{template} not found in {}", normalize_path(&file))
                    })?;
            finish_edit(&file, &text, &updated, write.write)
        }
        TemplateSubcommand::Remove {
            file,
            template,
            write,
        } => {
            let text = read_page(&file)?;
            let updated = remove_template(&text, &template)?
                .with_context(|| format!("{template} not found in {}", normalize_path(&file)))?;
            finish_edit(&file, &text, &updated, write.write)
        }
    }
}

fn run_category(output: OutputOptions, command: CategorySubcommand) -> Result<()> {
    match command {
        CategorySubcommand::List { file } => {
            let text = read_page(&file)?;
            let links = category_links(&text)?;
            if output.json {
                println!("{}", serde_json::to_string_pretty(&links)?);
                return Ok(());
            }
            println!("categories.count: {}", links.len());
            for link in links {
                match link.sort_key {
                    Some(key) => println!("categories.title: {} (sort key {key:?})", link.title),
                    None => println!("categories.title: {}", link.title),
                }
            }
            Ok(())
        }
        CategorySubcommand::Add { file, names, write } => {
            let text = read_page(&file)?;
            let mut updated = text.clone();
            for name in &names {
                updated = add_category(&updated, name)?;
            }
            finish_edit(&file, &text, &updated, write.write)
        }
        CategorySubcommand::Remove { file, names, write } => {
            let text = read_page(&file)?;
            let mut updated = text.clone();
            for name in &names {
                updated = remove_category(&updated, name)?;
            }
            finish_edit(&file, &text, &updated, write.write)
        }
        CategorySubcommand::Dedupe { file, write } => {
            let text = read_page(&file)?;
            let updated = remove_duplicate_categories(&text)?;
            finish_edit(&file, &text, &updated, write.write)
        }
    }
}

fn run_date(output: OutputOptions, raw: &str) -> Result<()> {
    let range = dates::parse(raw);
    if output.json {
        let row = DateOutput {
            raw,
            range,
            precision: range.precision(),
        };
        println!("{}", serde_json::to_string_pretty(&row)?);
        return Ok(());
    }
    println!("date.raw: {raw}");
    println!("date.earliest: {}", format_year(range.earliest_year));
    println!(
        "date.latest: {}",
        if range.is_unknown() {
            "unknown".to_string()
        } else {
            range.latest_year.to_string()
        }
    );
    println!("date.precise: {}", format_year(range.precise_year));
    println!("date.precision: {:?}", range.precision());
    Ok(())
}

fn run_license(output: OutputOptions, config: &CurateConfig, args: LicenseArgs) -> Result<()> {
    let country = parse_country(&args.country)?;
    let range = dates::parse(&args.date);
    let inference = config.license_inference();
    let mut decision = inference.infer(&range, args.death_year, &country);
    if !decision.is_granted() && args.anonymous {
        decision = inference.infer_anonymous(&range, &country);
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }
    println!("license.current_year: {}", inference.current_year());
    println!("license.country: {country}");
    match (&decision.tag, decision.denied_reason()) {
        (Some(tag), _) => println!("license.tag:\n{}", tag.wikitext()),
        (None, Some(reason)) => println!("license.tag: <none> ({})", reason.as_str()),
        (None, None) => println!("license.tag: <none>"),
    }
    Ok(())
}

fn run_graph(output: OutputOptions, config: &CurateConfig, command: GraphSubcommand) -> Result<()> {
    let cache_path = config.category_cache_path();
    let mut graph = load_graph(config, &cache_path)?;

    match command {
        GraphSubcommand::Load { categories, depth } => {
            let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
            let titles = categories
                .iter()
                .map(|name| PageTitle::category(name))
                .collect::<Vec<_>>();
            let result = load_categories(&mut graph, &mut client, &titles, depth, &cache_path);
            graph.save(&cache_path)?;
            result?;
            tracing::info!(requests = client.request_count(), "graph load finished");

            if output.json {
                let ancestors = titles
                    .iter()
                    .map(|title| (title.to_string(), graph.ancestors(title)))
                    .collect::<BTreeMap<_, _>>();
                println!("{}", serde_json::to_string_pretty(&ancestors)?);
                return Ok(());
            }
            for title in &titles {
                println!("graph.category: {title}");
                print_titles(output, "ancestors", &graph.ancestors(title))?;
            }
            Ok(())
        }
        GraphSubcommand::Ancestors { category } => {
            let ancestors = graph.ancestors(&PageTitle::category(&category));
            print_titles(output, "ancestors", &ancestors)
        }
        GraphSubcommand::Prune { categories } => {
            let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
            let mut set = categories
                .iter()
                .map(|name| PageTitle::category(name))
                .collect::<BTreeSet<_>>();
            let result = graph.prune_less_specific(&mut client, &mut set);
            graph.save(&cache_path)?;
            let pruned = result?;
            if output.json {
                println!("{}", serde_json::to_string_pretty(&pruned)?);
                return Ok(());
            }
            for entry in &pruned {
                println!("pruned: {} (ancestor of {})", entry.pruned, entry.because_of);
            }
            let kept = set.into_iter().collect::<Vec<_>>();
            print_titles(output, "kept", &kept)
        }
    }
}

fn run_curate(output: OutputOptions, config: &CurateConfig, args: CurateArgs) -> Result<()> {
    let text = read_page(&args.file)?;
    let country = args.country.as_deref().map(parse_country).transpose()?;
    let request = CurationRequest {
        date: args.date,
        author_death_year: args.death_year,
        country,
        anonymous_fallback: args.anonymous,
        add_categories: args.add,
        remove_categories: args.remove,
        prune: !args.no_prune,
    };

    let cache_path = config.category_cache_path();
    let mut graph = load_graph(config, &cache_path)?;
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
    let result = curate_page(
        &text,
        &request,
        &mut graph,
        &mut client,
        &config.license_inference(),
    );
    graph.save(&cache_path)?;
    let outcome =
        result.with_context(|| format!("failed to curate {}", normalize_path(&args.file)))?;

    if output.json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
        if args.write.write && outcome.report.changed {
            fs::write(&args.file, &outcome.text)
                .with_context(|| format!("failed to write {}", args.file.display()))?;
        }
        return Ok(());
    }
    finish_edit(&args.file, &text, &outcome.text, args.write.write)
}

fn run_mapping_pending<T>(output: OutputOptions, file: &Path) -> Result<()>
where
    T: MappingValue + Default + Serialize + serde::de::DeserializeOwned,
{
    let mapping = ManualMapping::<T>::load(file)?;
    let rows = mapping
        .pending()
        .map(|(raw, entry)| PendingRow {
            raw,
            from_pages: &entry.from_pages,
        })
        .collect::<Vec<_>>();

    if output.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!("mapping.entries: {}", mapping.len());
    println!("mapping.pending: {}", rows.len());
    for row in rows {
        println!("pending: {} ({} pages)", row.raw, row.from_pages.len());
    }
    Ok(())
}

/// Load each category in turn, saving the cache whenever enough fetches have piled up.
fn load_categories<S: PageSource + ?Sized>(
    graph: &mut CategoryGraph,
    source: &mut S,
    titles: &[PageTitle],
    depth: usize,
    cache_path: &Path,
) -> Result<()> {
    for title in titles {
        graph
            .ensure_loaded(source, title, depth)
            .with_context(|| format!("failed to load {title}"))?;
        if graph.checkpoint(cache_path)? {
            tracing::info!(path = %normalize_path(cache_path), nodes = graph.len(), "category cache checkpoint");
        }
    }
    Ok(())
}

fn load_graph(config: &CurateConfig, cache_path: &Path) -> Result<CategoryGraph> {
    Ok(CategoryGraph::load(cache_path)?
        .with_policy(config.cache_policy())
        .with_save_interval(config.save_interval()))
}

fn parse_country(raw: &str) -> Result<CountryCode> {
    CountryCode::parse(raw).with_context(|| format!("unrecognized country: {raw}"))
}

fn read_page(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn finish_edit(path: &Path, before: &str, after: &str, write: bool) -> Result<()> {
    if before == after {
        eprintln!("no changes: {}", normalize_path(path));
        return Ok(());
    }
    if write {
        fs::write(path, after).with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("updated: {}", normalize_path(path));
        return Ok(());
    }
    let name = normalize_path(path);
    let diff = TextDiff::from_lines(before, after);
    print!(
        "{}",
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("a/{name}"), &format!("b/{name}"))
    );
    Ok(())
}

fn print_titles(output: OutputOptions, label: &str, titles: &[PageTitle]) -> Result<()> {
    if output.json {
        println!("{}", serde_json::to_string_pretty(titles)?);
        return Ok(());
    }
    println!("{label}.count: {}", titles.len());
    for title in titles {
        println!("{label}.title: {title}");
    }
    Ok(())
}

fn format_year(year: Option<i32>) -> String {
    year.map(|year| year.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
