use freight_offers::{
    domain::{ListingKind, Partition},
    infra::OfferApiClient,
    util::{logging::init_tracing, settings::Settings, version::APP_NAME},
    OfferSession,
};

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "failed to load settings");
            std::process::exit(2);
        }
    };
    if settings.user_id.is_empty() {
        tracing::error!("no user configured; set FREIGHT_USER_ID or user_id in settings.json");
        std::process::exit(2);
    }

    let client = match OfferApiClient::from_settings(&settings) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialise API client");
            std::process::exit(2);
        }
    };
    tracing::info!(app = APP_NAME, api = %client.base_url(), user = %settings.user_id, "starting");

    let session = OfferSession::new(client, &settings);
    if let Err(err) = session.load_own_offers().await {
        tracing::error!(error = %err, "failed to load offers");
        std::process::exit(1);
    }

    let state = session.state().await;
    for kind in ListingKind::ALL {
        let store = state.offers(kind);
        for partition in [state.inbox(), state.outbox()] {
            let label = match partition {
                Partition::ByReceiver(_) => "received",
                _ => "sent",
            };
            tracing::info!(
                %kind,
                partition = label,
                total = store.offers(&partition).len(),
                pending = store.pending_count(&partition),
                "offers"
            );
        }
    }
}
