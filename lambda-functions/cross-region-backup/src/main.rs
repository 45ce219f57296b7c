use cross_region_backup::{AwsRdsSnapshots, CrossRegionBackupService};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use ops_common::LambdaResponse;
use serde_json::Value;

type Service = CrossRegionBackupService<AwsRdsSnapshots>;

async fn function_handler(service: &Service, event: LambdaEvent<Value>) -> Result<LambdaResponse, Error> {
    let (payload, context) = event.into_parts();
    Ok(service
        .handle_event(payload, &context.invoked_function_arn)
        .await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    ops_common::init_tracing();

    let service = CrossRegionBackupService::from_env().await?;
    let service = &service;

    run(service_fn(move |event: LambdaEvent<Value>| async move {
        function_handler(service, event).await
    }))
    .await
}
