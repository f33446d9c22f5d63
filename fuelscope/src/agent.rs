use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::llm::{extract_json_from_text, ChatMessage, ChatRequest, LlmProvider, ToolCall, ToolSpec};
use crate::opinet::{fuel_name, StationDetail};
use crate::stations::{thousands, StationCandidate};

pub const STATION_TOOL_NAME: &str = "station_info_search";
pub const NO_DATA_MESSAGE: &str = "주유소 데이터가 없습니다.";
pub const NO_RECOMMENDATION_MESSAGE: &str = "추천드릴 만한 주유소가 없습니다";

const AGENT_TEMPERATURE: f32 = 0.1;

/// Detail lookup for a single station id.
#[async_trait::async_trait]
pub trait StationLookup: Send + Sync {
    async fn station_detail(&self, station_id: &str) -> Result<Vec<StationDetail>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RecommendOptions {
    pub weight_price: f64,
    pub weight_distance: f64,
    pub top_k: usize,
    /// Upper bound on model turns in the tool loop
    pub max_steps: usize,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self {
            weight_price: 0.5,
            weight_distance: 0.5,
            top_k: 10,
            max_steps: 5,
        }
    }
}

impl RecommendOptions {
    pub fn from_config(config: &common::RecommendConfig) -> Self {
        Self {
            weight_price: config.weight_price(),
            weight_distance: config.weight_distance(),
            top_k: config.top_k(),
            max_steps: config.max_steps(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Recommendation {
    pub answer: String,
    /// Ids passed to the detail lookup, in call order
    pub station_ids: Vec<String>,
    pub details: Vec<StationDetail>,
}

impl Recommendation {
    fn sentinel(message: &str) -> Self {
        Self {
            answer: message.to_string(),
            ..Default::default()
        }
    }

    pub fn lookups(&self) -> usize {
        self.station_ids.len()
    }
}

#[derive(Debug, Deserialize)]
struct StationArgs {
    station_id: String,
}

pub fn station_tool() -> ToolSpec {
    ToolSpec {
        name: STATION_TOOL_NAME.to_string(),
        description: "station_id로 주유소의 상세정보를 조회합니다.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "station_id": {
                    "type": "string",
                    "description": "주유소의 아이디를 입력하세요. 예) A0011826"
                }
            },
            "required": ["station_id"]
        }),
    }
}

fn system_prompt(weight_price: f64, weight_distance: f64) -> String {
    format!(
        "당신은 합리적인 의사결정을 돕는 어시스턴트입니다.\n \
         - 가격 가중치: {:.2}, 거리 가중치: {:.2}\n\
         JSON을 검토하고 최적의 station_id를 선택한 후 반드시 `{tool}`를 1회 호출하여 상세정보를 얻으세요.\n\
         `{tool}`함수를 호출하여 얻은 주유소의 상세정보를 토대로 한글로 주소, 상표, 기름가격, 전화번호, 세차장 유무를 불릿형태로 작성하세요.\n\
         제목 양식을 준수하세요.\n\
         추천드리는 주유소는 **OOO**입니다.",
        weight_price,
        weight_distance,
        tool = STATION_TOOL_NAME
    )
}

fn candidates_json(candidates: &[StationCandidate]) -> String {
    Value::Array(candidates.iter().map(StationCandidate::prompt_record).collect()).to_string()
}

fn human_message(candidates: &[StationCandidate]) -> String {
    format!(
        "(JSON): {}\n최적의 주유소 한 곳을 골라 `{}`를 1회만 호출하세요.",
        candidates_json(candidates),
        STATION_TOOL_NAME
    )
}

/// Ask the model to pick one of the ranked candidates and describe it, letting it
/// call the detail tool. The "call once" rule is an instruction only; extra or
/// missing calls are logged. Lookup and provider failures propagate.
pub async fn recommend_station(
    provider: &dyn LlmProvider,
    lookup: &dyn StationLookup,
    candidates: &[StationCandidate],
    opts: &RecommendOptions,
) -> Result<Recommendation> {
    if candidates.is_empty() {
        return Ok(Recommendation::sentinel(NO_DATA_MESSAGE));
    }
    let top = &candidates[..opts.top_k.clamp(1, candidates.len())];

    let mut messages = vec![
        ChatMessage::system(system_prompt(opts.weight_price, opts.weight_distance)),
        ChatMessage::user(human_message(top)),
    ];
    let mut result = Recommendation::default();

    for step in 0..opts.max_steps.max(1) {
        let response = provider
            .chat(ChatRequest {
                messages: messages.clone(),
                tools: vec![station_tool()],
                temperature: Some(AGENT_TEMPERATURE),
                ..Default::default()
            })
            .await?;
        let reply = response.message;

        if reply.tool_calls.is_empty() {
            let answer = reply.content.unwrap_or_default().trim().to_string();
            if result.lookups() != 1 {
                warn!("agent: model made {} detail lookups instead of one", result.lookups());
            }
            result.answer = if answer.is_empty() {
                NO_RECOMMENDATION_MESSAGE.to_string()
            } else {
                answer
            };
            info!("agent: answered after {} steps", step + 1);
            return Ok(result);
        }

        let calls = reply.tool_calls.clone();
        messages.push(reply);
        for call in calls {
            let output = run_tool(lookup, &call, &mut result).await?;
            messages.push(ChatMessage::tool_result(call.id, output));
        }
    }

    warn!("agent: no final answer within {} steps", opts.max_steps);
    result.answer = NO_RECOMMENDATION_MESSAGE.to_string();
    Ok(result)
}

async fn run_tool(lookup: &dyn StationLookup, call: &ToolCall, result: &mut Recommendation) -> Result<String> {
    if call.name != STATION_TOOL_NAME {
        warn!("agent: model called unknown tool {}", call.name);
        return Ok(json!({"error": format!("unknown tool: {}", call.name)}).to_string());
    }
    let args: StationArgs = match serde_json::from_str(&call.arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!("agent: bad tool arguments {:?}: {}", call.arguments, e);
            return Ok(json!({"error": "station_id is required"}).to_string());
        }
    };

    debug!("agent: looking up station {}", args.station_id);
    let details = lookup.station_detail(&args.station_id).await?;
    let output = Value::Array(details.iter().map(StationDetail::to_tool_json).collect()).to_string();
    result.station_ids.push(args.station_id);
    result.details.extend(details);
    Ok(output)
}

/// Two-phase variant: the model only names a station, the lookup runs exactly once
/// and the answer text is rendered locally.
pub async fn recommend_station_two_phase(
    provider: &dyn LlmProvider,
    lookup: &dyn StationLookup,
    candidates: &[StationCandidate],
    opts: &RecommendOptions,
) -> Result<Recommendation> {
    if candidates.is_empty() {
        return Ok(Recommendation::sentinel(NO_DATA_MESSAGE));
    }
    let top = &candidates[..opts.top_k.clamp(1, candidates.len())];

    let system = format!(
        "당신은 합리적인 의사결정을 돕는 어시스턴트입니다.\n\
         - 가격 가중치: {:.2}, 거리 가중치: {:.2}\n\
         JSON을 검토하고 최적의 주유소 한 곳을 고르세요. \
         다른 설명 없이 {{\"station_id\": \"...\"}} 형식의 JSON만 답하세요.",
        opts.weight_price, opts.weight_distance
    );
    let response = provider
        .chat(ChatRequest {
            messages: vec![
                ChatMessage::system(system),
                ChatMessage::user(format!("(JSON): {}", candidates_json(top))),
            ],
            temperature: Some(AGENT_TEMPERATURE),
            ..Default::default()
        })
        .await?;

    let reply = response.message.content.unwrap_or_default();
    let chosen = extract_json_from_text(&reply)
        .and_then(|raw| serde_json::from_str::<StationArgs>(&raw).ok())
        .map(|args| args.station_id)
        .filter(|id| top.iter().any(|c| &c.station_id == id));
    let station_id = match chosen {
        Some(id) => id,
        None => {
            warn!("agent: model choice {:?} is not a candidate, using the top-ranked station", reply);
            top[0].station_id.clone()
        }
    };

    let details = lookup.station_detail(&station_id).await?;
    let answer = details
        .first()
        .map(format_recommendation)
        .unwrap_or_else(|| NO_RECOMMENDATION_MESSAGE.to_string());

    Ok(Recommendation {
        answer,
        station_ids: vec![station_id],
        details,
    })
}

/// Markdown answer for one station.
pub fn format_recommendation(detail: &StationDetail) -> String {
    let prices = if detail.prices.is_empty() {
        "정보 없음".to_string()
    } else {
        detail
            .prices
            .iter()
            .map(|p| format!("{} {}원", fuel_name(&p.product), thousands(p.price.round() as i64)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let phone = if detail.phone.trim().is_empty() {
        "정보 없음"
    } else {
        detail.phone.trim()
    };

    format!(
        "추천드리는 주유소는 **{}**입니다.\n\n\
         - 주소: {}\n\
         - 상표: {}\n\
         - 기름가격: {}\n\
         - 전화번호: {}\n\
         - 세차장: {}",
        detail.name.trim(),
        detail.address(),
        crate::opinet::brand_name(&detail.brand),
        prices,
        phone,
        if detail.car_wash { "있음" } else { "없음" }
    )
}
