use mailbox::{
    memory::MEMORY_ENDPOINT, settings, CachingConnectionFactory, ConnectionFactory, Email,
    InMemoryBroker, ListenerContainer, MessageTemplate, Receiver, RedisConnectionFactory,
    TextListener,
};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;

const BATCH_SIZE: usize = 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let settings = settings::load_config()?;

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log_level))
        .init();

    let target: Arc<dyn ConnectionFactory> = if settings.broker.url.starts_with(MEMORY_ENDPOINT) {
        Arc::new(InMemoryBroker::new())
    } else {
        Arc::new(RedisConnectionFactory::new(&settings.broker.url)?)
    };
    let factory: Arc<dyn ConnectionFactory> = Arc::new(CachingConnectionFactory::new(target));
    let destination = settings.destination();
    log::info!("Using {} on {}", destination, factory.endpoint());

    // Polling: send, then receive it back on the same thread.
    if !destination.is_topic() {
        let template = MessageTemplate::new(factory.clone())
            .with_receive_timeout(Some(Duration::from_secs(5)));
        template.send_text(&destination, "ping!").await?;
        match template.receive(&destination).await? {
            Some(message) => println!("message : {}", message.text()?),
            None => log::warn!("Nothing came back from {}", destination),
        }
    }

    // Listener container with plain text messages.
    let mut texts = ListenerContainer::new(factory.clone(), destination.clone(), TextListener)
        .concurrency(settings.listener.concurrency)
        .receive_timeout(settings.receive_timeout());
    texts.start().await?;

    let template = MessageTemplate::new(factory.clone());
    template.send_text(&destination, "ping!").await?;
    for index in 1..=BATCH_SIZE {
        template
            .send_text(&destination, &format!("ping! #{}", index))
            .await?;
    }
    sleep(Duration::from_millis(500)).await;
    texts.stop().await;

    // Receiver telling typed payloads, object envelopes and anything else apart.
    let mut receiver = ListenerContainer::new(factory.clone(), destination.clone(), Receiver)
        .concurrency(settings.listener.concurrency)
        .receive_timeout(settings.receive_timeout());
    receiver.start().await?;

    let email = Email::new("info@example.com", "Hello");
    println!("Sending a new message.");
    template.convert_and_send(&destination, &email).await?;
    template
        .send(&destination, |session| session.create_object_message(&email))
        .await?;
    template.send_text(&destination, "ping!").await?;

    sleep(Duration::from_millis(500)).await;
    receiver.stop().await;

    Ok(())
}
