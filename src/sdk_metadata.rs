use serde::Serialize;

/// Information about the SDK built on top of this core.
#[derive(Debug, Clone, Copy)]
pub struct SdkMetadata {
    /// SDK name. Usually, the host language name.
    pub name: &'static str,
    /// Version of the SDK.
    pub version: &'static str,
}

/// SDK identification attached to telemetry requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetaData {
    pub sdk_name: &'static str,
    pub sdk_version: &'static str,
    pub core_version: &'static str,
}

impl From<SdkMetadata> for EventMetaData {
    fn from(sdk: SdkMetadata) -> EventMetaData {
        (&sdk).into()
    }
}

impl From<&SdkMetadata> for EventMetaData {
    fn from(sdk: &SdkMetadata) -> EventMetaData {
        EventMetaData {
            sdk_name: sdk.name,
            sdk_version: sdk.version,
            core_version: env!("CARGO_PKG_VERSION"),
        }
    }
}
