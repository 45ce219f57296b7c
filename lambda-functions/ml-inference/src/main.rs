use aws_lambda_events::apigw::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use chrono::Utc;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use ml_inference::{MlInferenceService, RedshiftWarehouse, SageMakerInference};

type Service = MlInferenceService<SageMakerInference, RedshiftWarehouse>;

async fn function_handler(
    service: &Service,
    event: LambdaEvent<ApiGatewayProxyRequest>,
) -> Result<ApiGatewayProxyResponse, Error> {
    Ok(service
        .handle_request(event.payload, &event.context.request_id, Utc::now())
        .await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    ops_common::init_tracing();

    let service = MlInferenceService::from_env().await?;
    let service = &service;

    run(service_fn(
        move |event: LambdaEvent<ApiGatewayProxyRequest>| async move {
            function_handler(service, event).await
        },
    ))
    .await
}
