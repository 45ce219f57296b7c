use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use ops_common::{LambdaResponse, SnsNotifier};
use security_response::{AwsFindingArchive, AwsIsolation, SecurityResponseService};
use serde_json::Value;

type Service = SecurityResponseService<AwsIsolation, AwsFindingArchive, SnsNotifier>;

async fn function_handler(service: &Service, event: LambdaEvent<Value>) -> Result<LambdaResponse, Error> {
    Ok(service.handle_event(event.payload).await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    ops_common::init_tracing();

    let service = SecurityResponseService::from_env().await;
    let service = &service;

    run(service_fn(move |event: LambdaEvent<Value>| async move {
        function_handler(service, event).await
    }))
    .await
}
