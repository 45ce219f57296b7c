use aws_lambda_events::apigw::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use contact_handler::{ContactService, DynamoSubmissionStore};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use ops_common::SnsNotifier;

type Service = ContactService<DynamoSubmissionStore, SnsNotifier>;

async fn function_handler(
    service: &Service,
    event: LambdaEvent<ApiGatewayProxyRequest>,
) -> Result<ApiGatewayProxyResponse, Error> {
    Ok(service.handle_request(event.payload).await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    ops_common::init_tracing();

    let service = ContactService::from_env().await;
    let service = &service;

    run(service_fn(
        move |event: LambdaEvent<ApiGatewayProxyRequest>| async move {
            function_handler(service, event).await
        },
    ))
    .await
}
