use gatehouse_core::client::ClientOptions;
use gatehouse_core::User;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let sdk_key = std::env::var("GATEHOUSE_SDK_KEY").unwrap_or_default();

    let client = ClientOptions::from_sdk_key(sdk_key).to_client(User::with_user_id("example-user"));
    client.initialize_async().await;

    let gate = client.get_feature_gate("example_gate");
    println!(
        "example_gate = {} ({})",
        gate.evaluation.map(|gate| gate.value).unwrap_or(false),
        gate.details.reason
    );

    client.shutdown().await;
}
