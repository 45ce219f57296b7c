use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use ops_common::LambdaResponse;
use serde_json::Value;
use stream_processor::{AwsInference, RedshiftWarehouse, S3DataLake, StreamProcessorService};

type Service = StreamProcessorService<RedshiftWarehouse, S3DataLake, AwsInference>;

async fn function_handler(service: &Service, event: LambdaEvent<Value>) -> Result<LambdaResponse, Error> {
    Ok(service.handle_event(event.payload).await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    ops_common::init_tracing();

    let service = StreamProcessorService::from_env().await?;
    let service = &service;

    run(service_fn(move |event: LambdaEvent<Value>| async move {
        function_handler(service, event).await
    }))
    .await
}
