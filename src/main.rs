use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use thvote::config::AppConfig;
use thvote::crossref::{CharacterSongRow, ExclusiveSongs};
use thvote::outliers::{InternalOutlier, OutlierMode, RatioReport};
use thvote::region::{Region, SessionKey};
use thvote::stats::Correlation;
use thvote::store::AggregationStore;
use thvote::tags::TagDifference;
use thvote::trends::TrendPoint;

#[derive(Parser)]
#[command(name = "thvote", version, about = "Touhou popularity poll CN/JP aggregation")]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the aggregation store JSON
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build grouped workbooks from the raw tables and the reference tables
    Group,

    /// Load every workbook and write the aggregation store
    Build,

    /// Show aggregation store statistics
    Stats,

    /// Cross-reference character and song popularity for a CN and a JP session
    Music {
        /// CN session number
        cn: u32,

        /// JP session number
        jp: u32,

        /// |z| threshold for outliers (defaults to config)
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Outlier mode (defaults to config)
        #[arg(long, value_enum)]
        mode: Option<OutlierMode>,

        /// Ratio deviation threshold (defaults to config)
        #[arg(long)]
        ratio_threshold: Option<f64>,

        /// Number of table rows
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Also write the full report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Compute relative tag heat for every session and write it as JSON
    Tags {
        /// Rank boundary: characters ranked at or above it are excluded (defaults to config)
        #[arg(long)]
        rank_boundary: Option<i64>,

        /// Output directory (defaults to config output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of tags to print per region
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show one tag's heat across the sessions of a region
    TagTrend {
        tag: String,

        /// Region (cn or jp)
        #[arg(short, long, default_value = "cn")]
        region: Region,

        #[arg(long)]
        rank_boundary: Option<i64>,
    },

    /// Compare tag heat between a CN and a JP session
    TagDiff {
        /// CN session number
        cn: u32,

        /// JP session number
        jp: u32,

        /// Minimum |CN − JP| difference (defaults to config)
        #[arg(short, long)]
        threshold: Option<f64>,

        #[arg(long)]
        rank_boundary: Option<i64>,

        /// Number of results
        #[arg(short = 'n', long, default_value = "30")]
        limit: usize,
    },

    /// Vote share by first-appearance work per session
    Works {
        #[arg(short, long, default_value = "cn")]
        region: Region,
    },

    /// Share of the N most-voted characters per session
    Top {
        #[arg(short, long, default_value = "cn")]
        region: Region,

        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Show a character's vote share across sessions
    Character {
        /// Canonical name or character id
        name: String,

        /// Compare two sessions, e.g. --compare 11_cn 19_jp
        #[arg(long, num_args = 2, value_parser = parse_session_key)]
        compare: Option<Vec<SessionKey>>,
    },

    /// Collect wiki page text for external keyword extraction
    Wiki {
        /// Only characters of this session (e.g. 19_jp); otherwise every
        /// character at or above the work floor
        #[arg(long, value_parser = parse_session_key)]
        session: Option<SessionKey>,

        /// Minimum first-appearance work (defaults to config work_floor)
        #[arg(long)]
        floor: Option<f64>,

        /// Output JSON file (defaults to <output_dir>/wiki_texts.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_session_key(s: &str) -> std::result::Result<SessionKey, String> {
    SessionKey::parse(s).ok_or_else(|| format!("invalid session '{s}' (expected e.g. 11_cn)"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    // Resolve store path: CLI > config > XDG default
    let store_path = cli.store.clone().unwrap_or_else(|| config.store_path());
    log::info!("Store: {}", store_path.display());

    match cli.command {
        Commands::Group => {
            let reports = thvote::pipeline::group_workbooks(&config).context("Grouping failed")?;
            for (what, r) in &reports {
                println!(
                    "{:<16} {} sheets, {} kept, {} dropped, {} skipped sheets",
                    what, r.sheets, r.kept, r.dropped, r.skipped_sheets
                );
            }
        }

        Commands::Build => {
            let resolver = thvote::pipeline::build_resolver(&config);
            let store = thvote::pipeline::build_store(&config, &resolver).context("Build failed")?;
            store
                .save(&store_path)
                .with_context(|| format!("Failed to write {}", store_path.display()))?;
            println!(
                "Build complete: {} characters, {} songs, {} CN sessions, {} JP sessions",
                store.characters.len(),
                store.songs.len(),
                store.sessions(Region::Cn).len(),
                store.sessions(Region::Jp).len()
            );
            if !store.meta.missing_gender.is_empty() {
                println!("Sessions without gender data: {}", join_keys(&store.meta.missing_gender));
            }
            for (id, names) in &store.meta.id_collisions {
                println!("Id collision '{}': {}", id, names.join(", "));
            }
            println!("Wrote {}", store_path.display());
        }

        Commands::Stats => {
            let store = open_store(&store_path)?;
            let stats = store.stats();
            println!("Store Statistics");
            println!("================");
            if let Some(ts) = stats.generated_at {
                println!("Generated:        {}", ts.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!(
                "Characters:       {} ({} with keywords)",
                stats.characters, stats.characters_with_keywords
            );
            println!("Songs:            {}", stats.songs);
            println!("Works:            {}", stats.works);
            println!("Distinct tags:    {}", stats.distinct_keywords);
            println!("Gender sessions:  {}", stats.gender_sessions);
            println!();

            println!("Sessions:");
            for (region, count) in &stats.sessions {
                let keys = join_keys(store.sessions(*region));
                println!("  {:<4} {:>3}  {}", region, count, keys);
            }
            if !stats.sessions_without_total.is_empty() {
                println!();
                println!("Sessions without a usable total: {}", join_keys(&stats.sessions_without_total));
            }
            if !stats.missing_gender.is_empty() {
                println!("Sessions without gender data:     {}", join_keys(&stats.missing_gender));
            }
            if stats.id_collisions > 0 {
                println!("Colliding character ids:          {}", stats.id_collisions);
            }
        }

        Commands::Music { cn, jp, threshold, mode, ratio_threshold, limit, json } => {
            let store = open_store(&store_path)?;
            let resolver = thvote::pipeline::build_resolver(&config);
            let cn_key = SessionKey::new(Region::Cn, cn);
            let jp_key = SessionKey::new(Region::Jp, jp);
            let threshold = threshold.unwrap_or(config.analysis.outlier_threshold);
            let mode = mode.unwrap_or(config.analysis.outlier_mode);
            let ratio_threshold = ratio_threshold.unwrap_or(config.analysis.ratio_threshold);

            let mut tables = Vec::new();
            for key in [cn_key, jp_key] {
                let rows = thvote::crossref::character_song_table(&store, &resolver, key)
                    .with_context(|| format!("Cross-reference failed for {key}"))?;
                let correlation = thvote::crossref::character_song_correlation(&rows);
                let outliers = thvote::outliers::internal_outliers(&rows, threshold, mode);

                println!("Session {key}");
                println!();
                print_crossref_table(&rows, limit);
                println!();
                print_correlation(&correlation);
                println!();
                print_outlier_table(&outliers, threshold);
                println!();
                tables.push((key, rows, correlation, outliers));
            }

            let ratios = thvote::outliers::ratio_deviations(&tables[0].1, &tables[1].1, ratio_threshold);
            print_ratio_table(&ratios, ratio_threshold, limit);
            println!();

            let exclusive = thvote::crossref::exclusive_songs(&store, cn_key, jp_key)
                .context("Exclusive song lookup failed")?;
            print_exclusive_songs(&exclusive, cn_key, jp_key);

            if let Some(path) = json {
                let sessions: Vec<serde_json::Value> = tables
                    .iter()
                    .map(|(key, rows, correlation, outliers)| {
                        serde_json::json!({
                            "session": key,
                            "rows": rows,
                            "correlation": correlation,
                            "outliers": outliers,
                        })
                    })
                    .collect();
                let report = serde_json::json!({
                    "sessions": sessions,
                    "ratio_deviations": ratios,
                    "exclusive_songs": exclusive,
                });
                write_json(&path, &report)?;
                println!();
                println!("Wrote {}", path.display());
            }
        }

        Commands::Tags { rank_boundary, output, limit } => {
            let store = open_store(&store_path)?;
            let boundary = rank_boundary.unwrap_or(config.analysis.rank_boundary);
            let heat = thvote::tags::compute_relative_heat(&store, boundary);
            let dir = output.unwrap_or_else(|| config.output_dir());
            let written = thvote::tags::write_heat_json(&heat, &dir).context("Failed to write tag heat")?;

            let limit = limit.unwrap_or(config.analysis.top_n);
            for (region, rankings) in &heat {
                let Some((session, ranking)) = rankings.iter().next_back() else {
                    continue;
                };
                println!("{} session {} (latest), top {}", region, session, limit);
                print_tag_table(thvote::tags::top_tags(ranking, limit));
                println!();
            }
            for path in written {
                println!("Wrote {}", path.display());
            }
        }

        Commands::TagTrend { tag, region, rank_boundary } => {
            let store = open_store(&store_path)?;
            let boundary = rank_boundary.unwrap_or(config.analysis.rank_boundary);
            let heat = thvote::tags::compute_relative_heat(&store, boundary);
            let Some(rankings) = heat.get(&region) else {
                println!("No {region} sessions in store.");
                return Ok(());
            };
            let series = thvote::tags::tag_series(rankings, &tag);
            println!("{:<8} {:>8}", "Session", "Heat");
            println!("{}", "-".repeat(17));
            for (session, value) in series {
                println!("{:<8} {:>7.2}%", session, value * 100.0);
            }
        }

        Commands::TagDiff { cn, jp, threshold, rank_boundary, limit } => {
            let store = open_store(&store_path)?;
            let boundary = rank_boundary.unwrap_or(config.analysis.rank_boundary);
            let threshold = threshold.unwrap_or(config.analysis.tag_difference_threshold);
            let heat = thvote::tags::compute_relative_heat(&store, boundary);
            let ranking = |region: Region, n: u32| {
                heat.get(&region)
                    .and_then(|r| r.get(&n))
                    .with_context(|| format!("No tag heat for session {}", SessionKey::new(region, n)))
            };
            let diffs = thvote::tags::tag_region_difference(ranking(Region::Cn, cn)?, ranking(Region::Jp, jp)?, threshold);
            print_tag_diff_table(&diffs, limit);
        }

        Commands::Works { region } => {
            let store = open_store(&store_path)?;
            let shares = thvote::trends::work_shares(&store, region);
            if shares.is_empty() {
                println!("No {region} sessions with usable totals.");
                return Ok(());
            }
            for ws in &shares {
                println!("Session {}", ws.session);
                let mut rows: Vec<(&String, &f64)> = ws.shares.iter().collect();
                rows.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
                for (work, share) in rows {
                    println!("  {:<8} {:>7.2}%", work, share * 100.0);
                }
                println!();
            }
        }

        Commands::Top { region, count } => {
            let store = open_store(&store_path)?;
            let shares = thvote::trends::top_n_share(&store, region, count);
            println!("{:<8} {:>10}", "Session", format!("Top {count}"));
            println!("{}", "-".repeat(19));
            for (key, share) in shares {
                println!("{:<8} {:>9.2}%", key, share * 100.0);
            }
        }

        Commands::Character { name, compare } => {
            let store = open_store(&store_path)?;
            let Some((canonical, points)) = thvote::trends::character_trend(&store, &name) else {
                println!("No character matching \"{name}\" found.");
                return Ok(());
            };
            println!("{canonical}");
            println!();
            print_trend_table(&points);

            if let Some([first, second]) = compare.as_deref() {
                let cmp = thvote::trends::compare_character(&store, &name, *first, *second)
                    .context("Comparison failed")?;
                if let Some(cmp) = cmp {
                    println!();
                    println!("{:<8} {}", cmp.first, fmt_share(cmp.first_share));
                    println!("{:<8} {}", cmp.second, fmt_share(cmp.second_share));
                    match cmp.difference {
                        Some(d) => println!("{:<8} {:>+8.3}%", "diff", d * 100.0),
                        None => println!("{:<8} {:>9}", "diff", "n/a"),
                    }
                }
            }
        }

        Commands::Wiki { session, floor, output } => {
            let store = open_store(&store_path)?;
            let resolver = thvote::pipeline::build_resolver(&config);
            let floor = floor.unwrap_or(config.analysis.work_floor);
            let names = thvote::pipeline::wiki_names(&store, &resolver, session, floor);
            if names.is_empty() {
                println!("No characters selected.");
                return Ok(());
            }

            let client = thvote::wiki::WikiClient::new(&config.wiki, config.wiki_cache_dir());
            let result = thvote::wiki::collect_texts(&client, &names, &config.wiki);

            let path = output.unwrap_or_else(|| config.output_dir().join("wiki_texts.json"));
            write_json(&path, &result.texts)?;
            println!(
                "Wiki collection complete: {} characters, {} pages, {} empty, {} skipped",
                result.texts.len(),
                result.pages,
                result.empty_pages,
                result.skipped
            );
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<AggregationStore> {
    AggregationStore::load(path)
        .with_context(|| format!("Failed to open store {} (run `thvote build` first)", path.display()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn join_keys(keys: &[SessionKey]) -> String {
    keys.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", ")
}

fn fmt_share(share: Option<f64>) -> String {
    match share {
        Some(s) => format!("{:>8.3}%", s * 100.0),
        None => format!("{:>9}", "n/a"),
    }
}

/// Truncate by characters, not bytes: names are mostly CJK.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    } else {
        s.to_string()
    }
}

/// Print characters with their own and song-side popularity.
fn print_crossref_table(rows: &[CharacterSongRow], limit: usize) {
    println!(
        "{:<20} {:>7} {:>7} {:>6}  {:>6} {:>7} {:>5}",
        "Character", "Votes", "Share", "Z", "SongZ", "SongSh", "Songs"
    );
    println!("{}", "-".repeat(66));

    let mut sorted: Vec<&CharacterSongRow> = rows.iter().collect();
    sorted.sort_by(|a, b| b.votes.cmp(&a.votes).then_with(|| a.name.cmp(&b.name)));

    for r in sorted.into_iter().take(limit) {
        println!(
            "{:<20} {:>7} {:>6.2}% {:>6.2}  {:>6.2} {:>6.2}% {:>5}",
            truncate(&r.name, 20),
            r.votes,
            r.share * 100.0,
            r.z,
            r.song_mean_z,
            r.song_mean_share * 100.0,
            r.song_count,
        );
    }
}

fn print_correlation(c: &Correlation) {
    match c {
        Correlation::Rho { rho, p_value, n } => {
            let marker = if c.is_significant(0.05) { "significant" } else { "not significant" };
            println!("Spearman rho = {:.3}, p = {:.4}, n = {} ({})", rho, p_value, n, marker);
        }
        Correlation::Insufficient { n } => {
            println!("Spearman: not enough characters with songs (n = {})", n);
        }
        Correlation::Degenerate { n } => {
            println!("Spearman: one side is constant (n = {})", n);
        }
    }
}

fn print_outlier_table(outliers: &[InternalOutlier], threshold: f64) {
    println!("Outliers (|z| > {threshold}):");
    if outliers.is_empty() {
        println!("  none");
        return;
    }
    println!("{:<20} {:>6} {:>6} {:>5}  {}", "Character", "Z", "SongZ", "Songs", "Kind");
    println!("{}", "-".repeat(56));
    for o in outliers {
        println!(
            "{:<20} {:>6.2} {:>6.2} {:>5}  {}",
            truncate(&o.name, 20),
            o.z,
            o.song_mean_z,
            o.song_count,
            o.kind.label()
        );
    }
}

fn print_ratio_table(report: &RatioReport, threshold: f64, limit: usize) {
    println!(
        "CN/JP ratio deviations (|dev − 1| > {}): {} flagged, {} within, {} undefined",
        threshold,
        report.flagged.len(),
        report.within,
        report.undefined.len()
    );
    if report.flagged.is_empty() {
        return;
    }
    println!(
        "{:<20} {:>8} {:>6} {:>8} {:>6} {:>8} {:>6}",
        "Character", "CharR", "CharM", "MusicR", "MusM", "Dev", "Mag"
    );
    println!("{}", "-".repeat(70));
    for d in report.flagged.iter().take(limit) {
        println!(
            "{:<20} {:>8.3} {:>6.2} {:>8.3} {:>6.2} {:>8.3} {:>6.2}",
            truncate(&d.name, 20),
            d.char_ratio,
            d.char_magnitude,
            d.music_ratio,
            d.music_magnitude,
            d.deviation,
            d.magnitude
        );
    }
    println!();
    println!("CharM/MusM/Mag = max(r, 1/r)");
    for (name, reason) in &report.undefined {
        log::debug!("ratio undefined for {name}: {reason}");
    }
}

fn print_exclusive_songs(songs: &ExclusiveSongs, first: SessionKey, second: SessionKey) {
    println!("Only in {} ({}):", first, songs.only_first.len());
    for title in &songs.only_first {
        println!("  {title}");
    }
    println!("Only in {} ({}):", second, songs.only_second.len());
    for title in &songs.only_second {
        println!("  {title}");
    }
}

fn print_tag_table(tags: &[(String, f64)]) {
    println!("{:<24} {:>8}", "Tag", "Heat");
    println!("{}", "-".repeat(33));
    for (tag, heat) in tags {
        println!("{:<24} {:>7.2}%", truncate(tag, 24), heat * 100.0);
    }
}

fn print_tag_diff_table(diffs: &[TagDifference], limit: usize) {
    println!("{:<24} {:>8} {:>8} {:>9}", "Tag", "CN", "JP", "Diff");
    println!("{}", "-".repeat(52));
    for d in diffs.iter().take(limit) {
        println!(
            "{:<24} {:>7.2}% {:>7.2}% {:>+8.2}%",
            truncate(&d.tag, 24),
            d.cn * 100.0,
            d.jp * 100.0,
            d.diff * 100.0
        );
    }
}

fn print_trend_table(points: &[TrendPoint]) {
    println!("{:<8} {:>5} {:>7} {:>8}", "Session", "Rank", "Votes", "Share");
    println!("{}", "-".repeat(31));
    for p in points {
        let rank = p.rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string());
        println!("{:<8} {:>5} {:>7} {:>7.3}%", p.session, rank, p.votes, p.share * 100.0);
    }
}
