pub mod builders;
pub mod context;
pub mod manager;
pub mod sink;

pub use builders::{PLACE_CATEGORY_SEPARATOR, UNKNOWN_CATEGORY, derive_place_category};
pub use context::TrackerContext;
pub use manager::{ActionTracker, TrackerOptions, TrackerOverrides};
pub use sink::{ActionSink, CollectBatch, HttpCollectorSink, StdoutSink};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, EnumIter};

/// 交互类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionType {
    Click,
    Like,
    Bookmark,
}

impl ActionType {
    /// like / bookmark 需要低延迟送达，入队后立即尝试刷新
    pub fn flushes_immediately(&self) -> bool {
        matches!(self, Self::Like | Self::Bookmark)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "click" => Ok(Self::Click),
            "like" => Ok(Self::Like),
            "bookmark" => Ok(Self::Bookmark),
            _ => Err(format!(
                "Invalid action type: '{}'. Valid: click, like, bookmark",
                s
            )),
        }
    }
}

/// 页面上下文，在入队时拷贝进每条记录
///
/// 非浏览器宿主没有这些信息时保持空字符串。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    #[serde(default)]
    pub page_url: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub referrer: String,
}

/// 一条交互记录（构造后不再修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub user_id: Option<String>,
    pub place_id: String,
    pub place_category: String,
    pub action_type: ActionType,
    pub action_value: Option<i64>,
    pub action_detail: Map<String, Value>,
    pub session_id: String,
    pub page_url: String,
    pub user_agent: String,
    pub referrer: String,
    /// ISO-8601 UTC，毫秒精度
    pub timestamp: String,
}

/// 未经补全的追踪请求，由 builders 生成，交给 tracker 补全会话、页面与用户信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRequest {
    #[serde(rename = "kind", alias = "action_type")]
    pub action_type: ActionType,
    pub place_id: String,
    #[serde(default)]
    pub place_category: Option<String>,
    #[serde(default, rename = "value", alias = "action_value")]
    pub action_value: Option<i64>,
    #[serde(default, rename = "detail", alias = "action_detail")]
    pub action_detail: Map<String, Value>,
}

impl TrackRequest {
    pub fn new(action_type: ActionType, place_id: impl Into<String>) -> Self {
        Self {
            action_type,
            place_id: place_id.into(),
            place_category: None,
            action_value: None,
            action_detail: Map::new(),
        }
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.action_value = Some(value);
        self
    }

    pub fn with_detail(mut self, detail: Map<String, Value>) -> Self {
        self.action_detail = detail;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.place_category = Some(category.into());
        self
    }

    /// 显式给出的分类优先，否则从 place_id 推导
    pub fn resolved_category(&self) -> String {
        match &self.place_category {
            Some(category) => category.clone(),
            None => derive_place_category(&self.place_id),
        }
    }
}
