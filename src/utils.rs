use url::form_urlencoded;

use crate::constants::{RELAY_PROTOCOL, URI_SCHEME, URI_VERSION};
use crate::error::Error;

#[derive(Debug, PartialEq)]
pub struct UriParameters {
    pub topic: String,
    pub version: u32,
    pub sym_key: String,
    pub relay_protocol: String,
    pub relay_url: Option<String>,
}

/// `wc:{topic}@2?relay-protocol=irn[&relay-url=..]&symKey={key}`.
///
/// The key is standard base64 and is written as is.
pub fn build_pairing_uri(
    topic: &str,
    sym_key: &str,
    relay_url: Option<&str>,
) -> String {
    match relay_url {
        Some(url) => {
            let encoded: String =
                form_urlencoded::byte_serialize(url.as_bytes()).collect();
            format!(
                "{URI_SCHEME}:{topic}@{URI_VERSION}?relay-protocol={RELAY_PROTOCOL}&relay-url={encoded}&symKey={sym_key}"
            )
        }
        None => format!(
            "{URI_SCHEME}:{topic}@{URI_VERSION}?relay-protocol={RELAY_PROTOCOL}&symKey={sym_key}"
        ),
    }
}

pub fn parse_pairing_uri(input: &str) -> Result<UriParameters, Error> {
    let rest = input
        .strip_prefix("wc://")
        .or_else(|| input.strip_prefix("wc:"))
        .ok_or(Error::InvalidUri)?;

    let (path, query_string) =
        rest.split_once('?').ok_or(Error::PathEndNotFound)?;

    let (topic, version) = path.split_once('@').ok_or(Error::InvalidUri)?;
    let topic = topic.strip_prefix("//").unwrap_or(topic);
    if topic.is_empty() {
        return Err(Error::InvalidUri);
    }

    let mut sym_key = None;
    let mut relay_protocol = None;
    let mut relay_url = None;
    for pair in query_string.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            // base64 '+' must not be decoded as a space
            "symKey" => sym_key = Some(value.to_string()),
            "relay-protocol" => relay_protocol = Some(decode_component(value)),
            "relay-url" => relay_url = Some(decode_component(value)),
            _ => {}
        }
    }

    Ok(UriParameters {
        topic: topic.to_string(),
        version: version.parse()?,
        sym_key: sym_key
            .filter(|k| !k.is_empty())
            .ok_or(Error::SymKeyNotMentioned)?,
        relay_protocol: relay_protocol.ok_or(Error::RelayProtocolNotMentioned)?,
        relay_url,
    })
}

fn decode_component(value: &str) -> String {
    form_urlencoded::parse(format!("v={value}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str =
        "b29dcadbdad95479378331a2563baa512a71c014c30015387798a29f95aa44ee";
    const KEY: &str = "q+3/Ab9kZtYcGm5C0Yy0l0m4bNw3a1c2ZxE2n8Jm0Ok=";

    #[test]
    fn test_build_without_relay_url() {
        assert_eq!(
            build_pairing_uri(TOPIC, KEY, None),
            format!("wc:{TOPIC}@2?relay-protocol=irn&symKey={KEY}")
        );
    }

    #[test]
    fn test_build_with_relay_url() {
        let uri =
            build_pairing_uri(TOPIC, KEY, Some("wss://relay.example.com/relay"));
        assert_eq!(
            uri,
            format!(
                "wc:{TOPIC}@2?relay-protocol=irn&relay-url=wss%3A%2F%2Frelay.example.com%2Frelay&symKey={KEY}"
            )
        );
    }

    #[test]
    fn test_parse_round_trip_keeps_base64_key() {
        let uri =
            build_pairing_uri(TOPIC, KEY, Some("ws://127.0.0.1:8080/relay"));
        let parsed = parse_pairing_uri(&uri).unwrap();
        assert_eq!(
            parsed,
            UriParameters {
                topic: TOPIC.to_string(),
                version: 2,
                sym_key: KEY.to_string(),
                relay_protocol: "irn".to_string(),
                relay_url: Some("ws://127.0.0.1:8080/relay".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_sdk_style_uri() {
        let result = parse_pairing_uri(
            "wc:b29dcadbdad95479378331a2563baa512a71c014c30015387798a29f95aa44ee@2?relay-protocol=irn&symKey=761ab2f7f9deae2d5d18f887d2a8d812da0ec5fda0d0df8cc7ec1969832c0da2&expiryTimestamp=1742817708&methods=wc_sessionAuthenticate",
        )
        .unwrap();
        assert_eq!(result.topic, TOPIC);
        assert_eq!(
            result.sym_key,
            "761ab2f7f9deae2d5d18f887d2a8d812da0ec5fda0d0df8cc7ec1969832c0da2"
        );
        assert_eq!(result.relay_url, None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_pairing_uri("http://example.com"),
            Err(Error::InvalidUri)
        ));
        assert!(matches!(
            parse_pairing_uri(&format!("wc:{TOPIC}@2")),
            Err(Error::PathEndNotFound)
        ));
        assert!(matches!(
            parse_pairing_uri(&format!("wc:{TOPIC}@2?relay-protocol=irn")),
            Err(Error::SymKeyNotMentioned)
        ));
        assert!(matches!(
            parse_pairing_uri(&format!("wc:{TOPIC}@2?symKey={KEY}")),
            Err(Error::RelayProtocolNotMentioned)
        ));
        assert!(matches!(
            parse_pairing_uri(&format!("wc:{TOPIC}@two?relay-protocol=irn&symKey={KEY}")),
            Err(Error::ParseInt(_))
        ));
    }
}
