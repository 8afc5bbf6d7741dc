//! Discriminated unions on realistic resource payloads

use armrt::codec::{self, RawVariant};
use armrt::{discriminated_union, open_enum};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdnManagedCertificate {
    certificate_type: CertificateType,
    protocol_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyVaultCertificate {
    vault_name: String,
    secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret_version: Option<String>,
}

open_enum! {
    enum CertificateType {
        Shared => "Shared",
        Dedicated => "Dedicated",
    }
}

discriminated_union! {
    /// Where a custom domain's TLS certificate comes from
    enum CertificateSource: "certificateSource" {
        "Cdn" => Cdn(CdnManagedCertificate),
        "AzureKeyVault" => KeyVault(KeyVaultCertificate),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomDomainHttpsParameters {
    protocol_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "armrt::codec::optional")]
    certificate: Option<CertificateSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AksProperties {
    cluster_fqdn: String,
    agent_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmlComputeProperties {
    vm_size: String,
    #[serde(default)]
    max_node_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualMachineProperties {
    address: String,
    ssh_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Aks {
    properties: AksProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AmlCompute {
    properties: AmlComputeProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VirtualMachine {
    properties: VirtualMachineProperties,
}

discriminated_union! {
    enum Compute: "computeType" {
        "AKS" => Aks(Aks),
        "AmlCompute" => AmlCompute(AmlCompute),
        "VirtualMachine" => VirtualMachine(VirtualMachine),
    }
}

#[test]
fn test_decode_known_certificate_sources() {
    let key_vault: CertificateSource = codec::decode(
        br#"{"certificateSource":"AzureKeyVault","vaultName":"kv1","secretName":"tls"}"#,
    )
    .unwrap()
    .unwrap();

    assert_eq!(
        key_vault,
        CertificateSource::KeyVault(KeyVaultCertificate {
            vault_name: "kv1".to_string(),
            secret_name: "tls".to_string(),
            secret_version: None,
        })
    );
    assert_eq!(key_vault.tag(), "AzureKeyVault");

    let cdn = codec::decode_value::<CertificateSource>(json!({
        "certificateSource": "cdn",
        "certificateType": "dedicated",
        "protocolType": "ServerNameIndication"
    }))
    .unwrap()
    .unwrap();
    let CertificateSource::Cdn(cdn) = cdn else {
        panic!("expected the Cdn arm");
    };
    assert_eq!(cdn.certificate_type, CertificateType::Dedicated);
}

#[test]
fn test_encode_writes_canonical_tag() {
    let source = CertificateSource::Cdn(CdnManagedCertificate {
        certificate_type: CertificateType::Shared,
        protocol_type: "IPBased".to_string(),
    });

    let encoded = codec::encode_value(&source).unwrap();
    assert_eq!(encoded["certificateSource"], "Cdn");
    assert_eq!(encoded["certificateType"], "Shared");

    let decoded = assert_ok!(codec::decode_value::<CertificateSource>(encoded));
    assert_eq!(decoded, Some(source));
}

#[test]
fn test_unknown_compute_type_survives_round_trip() {
    let payload = json!({
        "computeType": "Kubernetes",
        "properties": {"namespace": "ml", "defaultInstanceType": "cpu"}
    });

    let compute = codec::decode_value::<Compute>(payload.clone()).unwrap().unwrap();
    let Compute::Raw(raw) = &compute else {
        panic!("unknown computeType must be kept raw");
    };
    assert_eq!(raw.tag(), "Kubernetes");
    assert_eq!(raw.get("properties").and_then(|p| p.get("namespace")), Some(&json!("ml")));

    assert_eq!(codec::encode_value(&compute).unwrap(), payload);
    assert_eq!(serde_json::to_value(&compute).unwrap(), payload);
}

#[test]
fn test_embedded_optional_union() {
    let params: CustomDomainHttpsParameters = serde_json::from_value(json!({
        "protocolType": "ServerNameIndication",
        "certificate": {"certificateSource": "AzureKeyVault", "vaultName": "kv", "secretName": "s", "secretVersion": "v2"}
    }))
    .unwrap();
    assert!(matches!(
        params.certificate,
        Some(CertificateSource::KeyVault(ref kv)) if kv.secret_version.as_deref() == Some("v2")
    ));

    // a nested object without the discriminator means "not set"
    let params: CustomDomainHttpsParameters = serde_json::from_value(json!({
        "protocolType": "IPBased",
        "certificate": {"vaultName": "kv"}
    }))
    .unwrap();
    assert_eq!(params.certificate, None);

    let params: CustomDomainHttpsParameters =
        serde_json::from_value(json!({"protocolType": "IPBased"})).unwrap();
    assert_eq!(serde_json::to_value(&params).unwrap(), json!({"protocolType": "IPBased"}));
}

#[test]
fn test_list_of_unions_mixes_known_and_raw() {
    let computes = codec::decode_list::<Compute>(json!([
        {"computeType": "AKS", "properties": {"clusterFqdn": "aks.example", "agentCount": 3}},
        {"computeType": "amlcompute", "properties": {"vmSize": "STANDARD_D2_V2"}},
        {"computeType": "Databricks", "properties": {}},
        {"computeType": "VirtualMachine", "properties": {"address": "10.0.0.4", "sshPort": 22}}
    ]))
    .unwrap();

    let tags: Vec<&str> = computes.iter().map(Compute::tag).collect();
    assert_eq!(tags, vec!["AKS", "AmlCompute", "Databricks", "VirtualMachine"]);
    assert!(matches!(computes[2], Compute::Raw(RawVariant { .. })));
}

#[test]
fn test_list_element_without_discriminator_reports_index() {
    let err = assert_err!(codec::decode_list::<Compute>(json!([
        {"computeType": "AKS", "properties": {"clusterFqdn": "a", "agentCount": 1}},
        {"properties": {}}
    ])));
    assert_eq!(err.path, "$[1]");
    assert_eq!(err.type_name, "Compute");
}

#[test]
fn test_known_tag_with_bad_fields_is_decode_error() {
    let err = codec::decode_value::<Compute>(json!({
        "computeType": "AKS",
        "properties": {"clusterFqdn": 42}
    }))
    .unwrap_err();
    assert_eq!(err.type_name, "Compute");
    assert!(err.to_string().contains("Compute"));
}

#[test]
fn test_absent_discriminator_is_none() {
    assert_eq!(codec::decode::<Compute>(b"").unwrap(), None);
    assert_eq!(codec::decode::<Compute>(b"null").unwrap(), None);
    assert_eq!(codec::decode_value::<Compute>(json!({"properties": {}})).unwrap(), None);

    // a bare union field must carry its discriminator
    assert!(serde_json::from_value::<Compute>(json!({"properties": {}})).is_err());
    let value: Value = serde_json::from_str("{}").unwrap();
    assert!(serde_json::from_value::<CertificateSource>(value).is_err());
}
