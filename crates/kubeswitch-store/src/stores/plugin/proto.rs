//! Messages of the `kubeswitch.store.v1.KubeconfigStore` gRPC service

use std::collections::HashMap;

pub const SERVICE: &str = "kubeswitch.store.v1.KubeconfigStore";

pub const GET_ID: &str = "/kubeswitch.store.v1.KubeconfigStore/GetID";
pub const GET_CONTEXT_PREFIX: &str = "/kubeswitch.store.v1.KubeconfigStore/GetContextPrefix";
pub const VERIFY_KUBECONFIG_PATHS: &str =
    "/kubeswitch.store.v1.KubeconfigStore/VerifyKubeconfigPaths";
pub const START_SEARCH: &str = "/kubeswitch.store.v1.KubeconfigStore/StartSearch";
pub const GET_KUBECONFIG_FOR_PATH: &str =
    "/kubeswitch.store.v1.KubeconfigStore/GetKubeconfigForPath";

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetIdRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetIdResponse {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetContextPrefixRequest {
    #[prost(string, tag = "1")]
    pub path: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetContextPrefixResponse {
    #[prost(string, tag = "1")]
    pub prefix: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VerifyKubeconfigPathsRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VerifyKubeconfigPathsResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StartSearchRequest {}

/// One streamed search record; a non-empty `error` marks a failed entry
#[derive(Clone, PartialEq, prost::Message)]
pub struct StartSearchResponse {
    #[prost(string, tag = "1")]
    pub kubeconfig_path: String,
    #[prost(string, tag = "2")]
    pub error: String,
    #[prost(map = "string, string", tag = "3")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetKubeconfigForPathRequest {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(map = "string, string", tag = "2")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetKubeconfigForPathResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub kubeconfig: Vec<u8>,
}
