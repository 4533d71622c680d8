//! Data models for the Xtream viewer

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Panels are inconsistent about ids: the same field arrives as `"12"` or `12`.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(D::Error::custom("expected string or number")),
    }
}

/// Optional text field where `null`, `""` and missing all mean "absent".
fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Live category as returned by `get_live_categories`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(rename = "category_id", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "category_name", default)]
    pub name: String,
}

/// Live channel as returned by `get_live_streams`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "stream_id", deserialize_with = "string_or_number")]
    pub stream_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "stream_icon", default, deserialize_with = "non_empty_string")]
    pub icon_url: Option<String>,
    #[serde(rename = "epg_channel_id", default, deserialize_with = "non_empty_string")]
    pub epg_channel_id: Option<String>,
}

/// Panel login. Lives as long as the session that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub server_url: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(server_url: &str, username: &str, password: &str) -> Self {
        Self {
            server_url: server_url.trim().trim_end_matches('/').to_string(),
            username: username.trim().to_string(),
            password: password.trim().to_string(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.server_url.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Channels whose name contains `term`, ignoring case. An empty term keeps everything.
pub fn filter_channels<'a>(channels: &'a [Channel], term: &str) -> Vec<&'a Channel> {
    let needle = term.trim().to_lowercase();
    channels
        .iter()
        .filter(|c| needle.is_empty() || c.name.to_lowercase().contains(&needle))
        .collect()
}

/// Replace the `password` query value so URLs can go to the log.
pub fn mask_password(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            let pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| {
                    let v = if k == "password" { "***".to_string() } else { v.into_owned() };
                    (k.into_owned(), v)
                })
                .collect();
            if pairs.is_empty() {
                return parsed.to_string();
            }
            parsed.query_pairs_mut().clear().extend_pairs(pairs);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_from_panel_json() {
        let json = r#"[
            {"num":1,"name":"BBC One","stream_id":101,"stream_icon":"http://x/bbc.png","epg_channel_id":"bbc1.uk"},
            {"num":2,"name":"Local","stream_id":"102","stream_icon":"","epg_channel_id":null}
        ]"#;
        let channels: Vec<Channel> = serde_json::from_str(json).unwrap();
        assert_eq!(channels[0].stream_id, "101");
        assert_eq!(channels[0].epg_channel_id.as_deref(), Some("bbc1.uk"));
        assert_eq!(channels[1].stream_id, "102");
        assert_eq!(channels[1].icon_url, None);
        assert_eq!(channels[1].epg_channel_id, None);
    }

    #[test]
    fn test_category_numeric_id() {
        let json = r#"{"category_id":7,"category_name":"Sports","parent_id":0}"#;
        let category: Category = serde_json::from_str(json).unwrap();
        assert_eq!(category.id, "7");
        assert_eq!(category.name, "Sports");
    }

    #[test]
    fn test_filter_channels_ignores_case() {
        let channels: Vec<Channel> = ["CNN International", "BBC News", "Cartoon Net"]
            .iter()
            .enumerate()
            .map(|(i, name)| Channel {
                stream_id: i.to_string(),
                name: name.to_string(),
                icon_url: None,
                epg_channel_id: None,
            })
            .collect();

        let hits = filter_channels(&channels, "news");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "BBC News");

        assert_eq!(filter_channels(&channels, "").len(), 3);
        assert_eq!(filter_channels(&channels, "C").len(), 3);
        assert!(filter_channels(&channels, "espn").is_empty());
    }

    #[test]
    fn test_credentials_normalised() {
        let creds = Credentials::new(" http://panel.example:8080/ ", " john ", "secret");
        assert_eq!(creds.server_url, "http://panel.example:8080");
        assert_eq!(creds.username, "john");
        assert!(creds.is_complete());
        assert!(!Credentials::new("http://panel.example", "", "x").is_complete());
    }

    #[test]
    fn test_mask_password() {
        let masked = mask_password("http://panel.example/xmltv.php?username=john&password=secret");
        assert!(masked.contains("username=john"));
        assert!(!masked.contains("secret"));
    }
}
