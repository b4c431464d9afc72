//! 从 Oracle 回复中提取 JSON 文档

/// 优先取 ```json 围栏内的内容，否则取第一个 `{` 到最后一个 `}`；都没有返回 None
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let body = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        return Some(body.trim());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}
