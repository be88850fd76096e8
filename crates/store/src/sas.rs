use crate::{CLOCK_SKEW_MINUTES, Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use sha2::Sha256;

/// The storage service version the signatures are produced against.
const SERVICE_VERSION: &str = "2022-11-02";

/// Container permissions carried by a delegation credential.
///
/// # Examples
///
/// ```
/// use stacforge_store::Permissions;
///
/// assert_eq!(Permissions::read_list().to_string(), "rl");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Permissions {
    /// Read blob content and properties.
    pub read: bool,

    /// Write blob content and properties.
    pub write: bool,

    /// Delete blobs.
    pub delete: bool,

    /// List blobs in the container.
    pub list: bool,
}

impl Permissions {
    /// The read + list set used for catalog ingestion sources.
    pub fn read_list() -> Permissions {
        Permissions {
            read: true,
            list: true,
            ..Default::default()
        }
    }
}

impl std::fmt::Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (set, letter) in [
            (self.read, 'r'),
            (self.write, 'w'),
            (self.delete, 'd'),
            (self.list, 'l'),
        ] {
            if set {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

/// A user delegation key, as returned by the blob service.
#[derive(Clone, Debug, Default)]
pub(crate) struct UserDelegationKey {
    pub(crate) signed_oid: String,
    pub(crate) signed_tid: String,
    pub(crate) signed_start: String,
    pub(crate) signed_expiry: String,
    pub(crate) signed_service: String,
    pub(crate) signed_version: String,
    pub(crate) value: String,
}

impl UserDelegationKey {
    /// Parses the XML body of a `userdelegationkey` response.
    pub(crate) fn from_xml(body: &str) -> Result<UserDelegationKey> {
        let mut reader = quick_xml::Reader::from_str(body);
        reader.config_mut().trim_text(true);
        let mut key = UserDelegationKey::default();
        let mut element = String::new();
        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    element = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                }
                Event::Text(text) => {
                    let text = text.unescape()?.into_owned();
                    match element.as_str() {
                        "SignedOid" => key.signed_oid = text,
                        "SignedTid" => key.signed_tid = text,
                        "SignedStart" => key.signed_start = text,
                        "SignedExpiry" => key.signed_expiry = text,
                        "SignedService" => key.signed_service = text,
                        "SignedVersion" => key.signed_version = text,
                        "Value" => key.value = text,
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if key.value.is_empty() {
            Err(Error::DelegationKey("missing Value element".to_string()))
        } else {
            Ok(key)
        }
    }
}

pub(crate) fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Returns the backdated start time for a new credential.
pub(crate) fn start_time() -> DateTime<Utc> {
    Utc::now() - Duration::minutes(CLOCK_SKEW_MINUTES)
}

/// Builds the XML request body for a user delegation key.
pub(crate) fn key_request_body(start: DateTime<Utc>, expiry: DateTime<Utc>) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><KeyInfo><Start>{}</Start><Expiry>{}</Expiry></KeyInfo>",
        format_time(start),
        format_time(expiry),
    )
}

/// Signs a container-scoped delegation credential and returns its query
/// string form.
pub(crate) fn sign_container_sas(
    key: &UserDelegationKey,
    account: &str,
    container: &str,
    start: DateTime<Utc>,
    expiry: DateTime<Utc>,
    permissions: Permissions,
) -> Result<String> {
    let signed_permissions = permissions.to_string();
    let signed_start = format_time(start);
    let signed_expiry = format_time(expiry);
    let canonicalized_resource = format!("/blob/{account}/{container}");

    // The field order is fixed by the service contract; an empty line per
    // unused field is still required.
    let string_to_sign = [
        signed_permissions.as_str(),
        signed_start.as_str(),
        signed_expiry.as_str(),
        canonicalized_resource.as_str(),
        key.signed_oid.as_str(),
        key.signed_tid.as_str(),
        key.signed_start.as_str(),
        key.signed_expiry.as_str(),
        key.signed_service.as_str(),
        key.signed_version.as_str(),
        "", // signed authorized user object id
        "", // signed unauthorized user object id
        "", // signed correlation id
        "", // signed IP
        "https",
        SERVICE_VERSION,
        "c",
        "", // signed snapshot time
        "", // signed encryption scope
        "", // cache-control
        "", // content-disposition
        "", // content-encoding
        "", // content-language
        "", // content-type
    ]
    .join("\n");

    let mut mac = Hmac::<Sha256>::new_from_slice(&BASE64.decode(&key.value)?)
        .map_err(|err| Error::DelegationKey(err.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let _ = query
        .append_pair("sv", SERVICE_VERSION)
        .append_pair("sr", "c")
        .append_pair("sp", &signed_permissions)
        .append_pair("st", &signed_start)
        .append_pair("se", &signed_expiry)
        .append_pair("skoid", &key.signed_oid)
        .append_pair("sktid", &key.signed_tid)
        .append_pair("skt", &key.signed_start)
        .append_pair("ske", &key.signed_expiry)
        .append_pair("sks", &key.signed_service)
        .append_pair("skv", &key.signed_version)
        .append_pair("spr", "https")
        .append_pair("sig", &signature);
    Ok(query.finish())
}

#[cfg(test)]
mod tests {
    use super::{Permissions, UserDelegationKey, key_request_body, sign_container_sas};
    use chrono::{TimeZone, Utc};

    const KEY_RESPONSE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<UserDelegationKey>
    <SignedOid>11111111-2222-3333-4444-555555555555</SignedOid>
    <SignedTid>66666666-7777-8888-9999-000000000000</SignedTid>
    <SignedStart>2024-05-01T00:00:00Z</SignedStart>
    <SignedExpiry>2024-05-02T00:00:00Z</SignedExpiry>
    <SignedService>b</SignedService>
    <SignedVersion>2022-11-02</SignedVersion>
    <Value>YmFzZTY0LWtleS1tYXRlcmlhbA==</Value>
</UserDelegationKey>"#;

    #[test]
    fn permissions_string() {
        assert_eq!(Permissions::read_list().to_string(), "rl");
        assert_eq!(
            Permissions {
                read: true,
                write: true,
                delete: true,
                list: true,
            }
            .to_string(),
            "rwdl"
        );
        assert_eq!(Permissions::default().to_string(), "");
    }

    #[test]
    fn parse_key() {
        let key = UserDelegationKey::from_xml(KEY_RESPONSE).unwrap();
        assert_eq!(key.signed_oid, "11111111-2222-3333-4444-555555555555");
        assert_eq!(key.signed_service, "b");
        assert_eq!(key.value, "YmFzZTY0LWtleS1tYXRlcmlhbA==");
    }

    #[test]
    fn parse_key_without_value() {
        assert!(UserDelegationKey::from_xml("<UserDelegationKey></UserDelegationKey>").is_err());
    }

    #[test]
    fn key_request() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let expiry = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let body = key_request_body(start, expiry);
        assert!(body.contains("<Start>2024-05-01T00:00:00Z</Start>"));
        assert!(body.contains("<Expiry>2024-05-02T00:00:00Z</Expiry>"));
    }

    #[test]
    fn signed_query() {
        let key = UserDelegationKey::from_xml(KEY_RESPONSE).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let expiry = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let sas =
            sign_container_sas(&key, "acct", "scenes", start, expiry, Permissions::read_list())
                .unwrap();
        assert!(sas.contains("sr=c"));
        assert!(sas.contains("sp=rl"));
        assert!(sas.contains("sig="));
        assert!(sas.contains("skoid=11111111-2222-3333-4444-555555555555"));
        // Signing is deterministic for fixed inputs.
        let again =
            sign_container_sas(&key, "acct", "scenes", start, expiry, Permissions::read_list())
                .unwrap();
        assert_eq!(sas, again);
    }
}
