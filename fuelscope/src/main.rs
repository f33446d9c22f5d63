/*
fuelscope - command line front end.
`news` runs the fetch -> index -> summarise pipeline, `ask` queries the existing
collection, `prices` prints Opinet averages and seven-day trends and `recommend` picks a nearby station.
*/

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use fuelscope::agent::{recommend_station, recommend_station_two_phase, RecommendOptions};
use fuelscope::cache::TtlCache;
use fuelscope::error::is_credential_missing;
use fuelscope::ingestion::{self, FetchOptions};
use fuelscope::kakao::KakaoClient;
use fuelscope::llm::remote::RemoteLlmProvider;
use fuelscope::llm::summarizer::summarize_news;
use fuelscope::opinet::{fuel_name, FuelKind, OpinetClient, SortOrder};
use fuelscope::pipeline::{run_news_pipeline, PipelineDeps};
use fuelscope::scraping::ReadabilityExtractor;
use fuelscope::stations::search_candidates;
use fuelscope::storage::{SqliteVectorStore, VectorStore};

const MISSING_KEY_MESSAGE: &str = "**OPEN API KEY를 확인해주세요**";

#[derive(Parser, Debug)]
#[command(name = "fuelscope", about = "Fuel price news summaries and station recommendations")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a feed, update the vector collection and summarise recent oil news
    News {
        /// Feed name from the configuration (or a built-in feed name)
        #[arg(long)]
        feed: Option<String>,
        /// Feed URL, overriding --feed
        #[arg(long)]
        url: Option<String>,
    },
    /// Ask a question against the existing collection without fetching
    Ask {
        question: String,
        #[arg(long)]
        k: Option<usize>,
    },
    /// National (or per-province) average prices
    Prices {
        #[arg(long, conflicts_with_all = ["recent", "areas"])]
        sido: bool,
        /// Seven-day average price trend for one fuel
        #[arg(long)]
        recent: bool,
        #[arg(long, default_value = "휘발유")]
        fuel: FuelKind,
        /// Area code for the trend (see --areas); national when omitted
        #[arg(long, requires = "recent")]
        area: Option<String>,
        /// List province area codes
        #[arg(long, conflicts_with = "recent")]
        areas: bool,
    },
    /// Recommend a station near an address or WGS84 point
    Recommend {
        #[arg(long, conflicts_with_all = ["lon", "lat"])]
        address: Option<String>,
        #[arg(long, requires = "lat")]
        lon: Option<f64>,
        #[arg(long, requires = "lon")]
        lat: Option<f64>,
        #[arg(long)]
        radius: Option<u32>,
        #[arg(long, default_value = "휘발유")]
        fuel: FuelKind,
        #[arg(long, default_value = "price")]
        sort: SortOrder,
        /// Let the model only choose; look up and format the answer locally
        #[arg(long)]
        two_phase: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = match args.config {
        Some(p) => {
            if !p.exists() {
                error!(path = ?p, "specified config file not found");
                return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
            }
            Some(p)
        }
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };
    let config = Config::load_with_defaults(
        Some(default_path.as_path()).filter(|p| p.exists()),
        override_path.as_deref(),
    )
    .await?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    match run(config, args.command).await {
        Err(e) if is_credential_missing(&e) => {
            error!("{:#}", e);
            println!("{}", MISSING_KEY_MESSAGE);
            Ok(())
        }
        other => other,
    }
}

async fn run(config: Config, command: Command) -> Result<()> {
    match command {
        Command::News { feed, url } => news(&config, feed, url).await,
        Command::Ask { question, k } => ask(&config, &question, k).await,
        Command::Prices {
            sido,
            recent,
            fuel,
            area,
            areas,
        } => {
            let view = if areas {
                PriceView::Areas
            } else if recent {
                PriceView::Recent { fuel, area }
            } else if sido {
                PriceView::Sido
            } else {
                PriceView::National
            };
            prices(&config, view).await
        }
        Command::Recommend {
            address,
            lon,
            lat,
            radius,
            fuel,
            sort,
            two_phase,
        } => {
            let location = match (address, lon, lat) {
                (Some(addr), _, _) => Location::Address(addr),
                (None, Some(lon), Some(lat)) => Location::Point(lon, lat),
                _ => anyhow::bail!("either --address or --lon/--lat is required"),
            };
            recommend(&config, location, radius, fuel, sort, two_phase).await
        }
    }
}

fn resolve_feed_url(config: &Config, name: Option<&str>) -> Result<String> {
    if let Some(feed) = config.news.feed(name) {
        return Ok(feed.url.clone());
    }
    let keywords = FetchOptions::from_config(&config.news).keywords;
    let builtin = ingestion::default_feeds(&keywords);
    let wanted = name.or(config.news.default_feed.as_deref());
    match wanted {
        Some(wanted) => builtin
            .into_iter()
            .find(|(n, _)| n == wanted)
            .map(|(_, url)| url)
            .with_context(|| format!("unknown feed: {}", wanted)),
        None => builtin
            .into_iter()
            .next()
            .map(|(_, url)| url)
            .context("no feeds configured"),
    }
}

async fn news(config: &Config, feed: Option<String>, url: Option<String>) -> Result<()> {
    let feed_url = match url {
        Some(url) => url,
        None => resolve_feed_url(config, feed.as_deref())?,
    };
    let provider = RemoteLlmProvider::from_config(&config.llm)?;
    let store = SqliteVectorStore::open(
        &config.vector_store.persist_dir(),
        config.vector_store.collection(),
    )
    .await?;
    let timeout = config.news.fetch_timeout_seconds();
    let resolver = ingestion::resolver_for(&feed_url, timeout)?;
    let extractor = ReadabilityExtractor::new()?;

    let report = run_news_pipeline(
        config,
        &feed_url,
        PipelineDeps {
            provider: &provider,
            store: &store,
            resolver: resolver.as_ref(),
            extractor: &extractor,
        },
    )
    .await?;

    println!("수집 성공 : {}건", report.fetched);
    if report.initial_build {
        println!("청크 저장 : {}개", report.new_chunks);
    } else {
        println!("새로운 청크 저장 : {}개", report.new_chunks);
        println!("삭제한 청크 개수 : {}개", report.deleted);
    }
    println!("벡터DB 청크 개수 : {} -> {}", report.count_before, report.count_after);
    println!("\n===== 요약 결과 =====\n");
    println!("{}", report.answer);
    Ok(())
}

async fn ask(config: &Config, question: &str, k: Option<usize>) -> Result<()> {
    let provider = RemoteLlmProvider::from_config(&config.llm)?;
    let persist_dir = config.vector_store.persist_dir();
    let store = if SqliteVectorStore::exists(&persist_dir) {
        Some(SqliteVectorStore::open(&persist_dir, config.vector_store.collection()).await?)
    } else {
        None
    };

    let answer = summarize_news(
        store.as_ref().map(|s| s as &dyn VectorStore),
        &provider,
        question,
        k.unwrap_or_else(|| config.news.top_k()),
    )
    .await?;
    println!("{}", answer);
    Ok(())
}

fn cache(config: &Config) -> Arc<TtlCache> {
    Arc::new(TtlCache::new(Duration::from_secs(config.cache.ttl_seconds())))
}

enum PriceView {
    National,
    Sido,
    Recent { fuel: FuelKind, area: Option<String> },
    Areas,
}

async fn prices(config: &Config, view: PriceView) -> Result<()> {
    let opinet = OpinetClient::from_config(&config.opinet)?.with_cache(cache(config));

    match view {
        PriceView::National => {
            for p in opinet.avg_all_price().await? {
                let date = p
                    .date()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| p.trade_date.clone());
                println!(
                    "{} {:<10} {:>9.2}원 ({:+.2})",
                    date,
                    p.fuel_name(),
                    p.price,
                    p.diff
                );
            }
        }
        PriceView::Sido => {
            for p in opinet.avg_sido_price().await? {
                println!(
                    "{:<6} {:<10} {:>9.2}원 ({:+.2})",
                    p.sido_name,
                    fuel_name(&p.product),
                    p.price,
                    p.diff
                );
            }
        }
        PriceView::Recent { fuel, area } => {
            let today = Utc::now().with_timezone(&ingestion::kst()).date_naive();
            let series = match &area {
                Some(code) => opinet.recent_area_avg_price(code, fuel, today).await?,
                None => opinet.recent_avg_price(fuel, today).await?,
            };
            println!("{} 최근 7일 평균가 ({})", fuel, area.as_deref().unwrap_or("전국"));
            for day in series {
                let date = day
                    .day()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| day.date.clone());
                println!("{} {:>9.2}원", date, day.price);
            }
        }
        PriceView::Areas => {
            for a in opinet.area_codes().await? {
                println!("{} {}", a.code, a.name);
            }
        }
    }
    Ok(())
}

enum Location {
    Address(String),
    Point(f64, f64),
}

async fn recommend(
    config: &Config,
    location: Location,
    radius: Option<u32>,
    fuel: FuelKind,
    sort: SortOrder,
    two_phase: bool,
) -> Result<()> {
    let shared = cache(config);
    let kakao = KakaoClient::from_config(&config.kakao)?.with_cache(shared.clone());
    let opinet = OpinetClient::from_config(&config.opinet)?.with_cache(shared);

    let (lon, lat) = match location {
        Location::Point(lon, lat) => (lon, lat),
        Location::Address(addr) => kakao
            .address_to_coords(&addr)
            .await?
            .with_context(|| format!("주소를 찾을 수 없습니다: {}", addr))?,
    };
    let radius = radius.unwrap_or_else(|| config.recommend.radius_m());

    let candidates = search_candidates(&kakao, &opinet, lon, lat, radius, fuel, sort).await?;
    println!("반경 {}m 주유소 조회: {}곳", radius, candidates.len());
    for c in &candidates {
        println!("  {}", c.prompt_record());
    }

    let provider = RemoteLlmProvider::from_config(&config.llm)?;
    let opts = RecommendOptions::from_config(&config.recommend);
    let recommendation = if two_phase {
        recommend_station_two_phase(&provider, &opinet, &candidates, &opts).await?
    } else {
        recommend_station(&provider, &opinet, &candidates, &opts).await?
    };

    println!("\n{}", recommendation.answer);
    Ok(())
}
