//! 交互记录构造器
//!
//! 纯函数：把 click / like / bookmark 交互整理成 [`TrackRequest`]，
//! 会话、页面、用户信息由 tracker 在入队时补全。

use serde_json::{Map, Value, json};

use super::{ActionType, TrackRequest};

/// place_id 中分类与编号之间的分隔符
pub const PLACE_CATEGORY_SEPARATOR: char = '_';

/// 无法推导分类时使用的值
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// 从 place_id 推导分类：取最后一个分隔符之前的部分
///
/// `museum_123` → `museum`，`abc` → `unknown`
pub fn derive_place_category(place_id: &str) -> String {
    match place_id.rsplit_once(PLACE_CATEGORY_SEPARATOR) {
        Some((prefix, _)) if !prefix.is_empty() => prefix.to_string(),
        _ => UNKNOWN_CATEGORY.to_string(),
    }
}

fn toggle_value(flag: bool) -> i64 {
    if flag { 1 } else { 0 }
}

/// 先写入构造器自己的字段，再由 extra 覆盖
fn merge_detail(base: Map<String, Value>, extra: Option<Map<String, Value>>) -> Map<String, Value> {
    let mut detail = base;
    if let Some(extra) = extra {
        detail.extend(extra);
    }
    detail
}

fn base_detail(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

/// 景点查看点击
pub fn click_request(place_id: impl Into<String>, extra: Option<Map<String, Value>>) -> TrackRequest {
    TrackRequest::new(ActionType::Click, place_id)
        .with_value(1)
        .with_detail(merge_detail(
            base_detail("click_type", json!("attraction_view")),
            extra,
        ))
}

pub fn like_request(
    place_id: impl Into<String>,
    is_liked: bool,
    extra: Option<Map<String, Value>>,
) -> TrackRequest {
    TrackRequest::new(ActionType::Like, place_id)
        .with_value(toggle_value(is_liked))
        .with_detail(merge_detail(base_detail("is_liked", json!(is_liked)), extra))
}

pub fn bookmark_request(
    place_id: impl Into<String>,
    is_bookmarked: bool,
    extra: Option<Map<String, Value>>,
) -> TrackRequest {
    TrackRequest::new(ActionType::Bookmark, place_id)
        .with_value(toggle_value(is_bookmarked))
        .with_detail(merge_detail(
            base_detail("is_bookmarked", json!(is_bookmarked)),
            extra,
        ))
}
