//! Thin asynchronous client for the marketplace REST backend.
//!
//! - `{kind}-offers` for creating, listing and updating offers.
//! - `{kind}-ads` for the cargo and vehicle listings offers target.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::{
    format_description::well_known::{Iso8601, Rfc3339},
    OffsetDateTime, PrimitiveDateTime,
};

use crate::domain::{Listing, ListingKind, NewOffer, Offer, OfferId, OfferStatus, Partition};
use crate::infra::backend::{OfferBackend, OfferClientError};
use crate::util::settings::Settings;
use crate::util::version::user_agent;

#[derive(Clone)]
pub struct OfferApiClient {
    http: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl OfferApiClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, OfferClientError> {
        let client = Self::with_base_url(&settings.api_base_url)?;
        Ok(match settings.auth_token.as_deref() {
            Some(token) => client.with_bearer_token(token),
            None => client,
        })
    }

    pub fn with_base_url(base: &str) -> Result<Self, OfferClientError> {
        // `Url::join` drops the last segment unless the base ends in a slash.
        let base_url = if base.ends_with('/') {
            Url::parse(base)?
        } else {
            Url::parse(&format!("{base}/"))?
        };
        let http = Client::builder().user_agent(user_agent()).build()?;
        Ok(Self {
            http,
            base_url,
            auth_token: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = (!token.trim().is_empty()).then_some(token);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn offers_url(&self, kind: ListingKind) -> Result<Url, url::ParseError> {
        self.base_url.join(&format!("{}-offers", kind.name()))
    }

    fn offer_url(&self, kind: ListingKind, offer_id: OfferId) -> Result<Url, url::ParseError> {
        self.base_url
            .join(&format!("{}-offers/{offer_id}", kind.name()))
    }

    fn listings_url(&self, kind: ListingKind) -> Result<Url, url::ParseError> {
        self.base_url.join(&format!("{}-ads", kind.name()))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.auth_token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch_json<T>(&self, builder: RequestBuilder) -> Result<T, OfferClientError>
    where
        T: DeserializeOwned,
    {
        let response = self.authorize(builder).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %message, "backend rejected request");
            return Err(OfferClientError::Status {
                status: status.as_u16(),
                message: if message.trim().is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    message
                },
            });
        }

        let body = response.bytes().await?;
        decode_body(&body)
    }
}

#[async_trait]
impl OfferBackend for OfferApiClient {
    async fn create_offer(&self, offer: &NewOffer) -> Result<Offer, OfferClientError> {
        let url = self.offers_url(offer.kind)?;
        tracing::debug!(%url, listing_id = %offer.listing_id, "creating offer");
        let payload = NewOfferDto::from(offer);
        let dto: OfferDto = self.fetch_json(self.http.post(url).json(&payload)).await?;
        dto.into_offer(offer.kind)
    }

    async fn update_status(
        &self,
        kind: ListingKind,
        offer_id: OfferId,
        status: OfferStatus,
    ) -> Result<Offer, OfferClientError> {
        let url = offer_status_url(&self.base_url, kind, offer_id)?;
        tracing::debug!(%url, %status, "updating offer status");
        let body = StatusUpdateDto {
            status: status.name(),
        };
        let dto: OfferDto = self.fetch_json(self.http.patch(url).json(&body)).await?;
        dto.into_offer(kind)
    }

    async fn list_offers(
        &self,
        kind: ListingKind,
        partition: &Partition,
    ) -> Result<Vec<Offer>, OfferClientError> {
        let mut url = self.offers_url(kind)?;
        {
            let mut query = url.query_pairs_mut();
            match partition {
                Partition::BySender(id) => query.append_pair("senderId", id),
                Partition::ByReceiver(id) => query.append_pair("receiverId", id),
                Partition::ByListing(id) => query.append_pair("listingId", id),
            };
        }
        tracing::debug!(%url, "listing offers");
        let dtos: Vec<OfferDto> = self.fetch_json(self.http.get(url)).await?;
        dtos.into_iter().map(|dto| dto.into_offer(kind)).collect()
    }

    async fn get_offer(
        &self,
        kind: ListingKind,
        offer_id: OfferId,
    ) -> Result<Offer, OfferClientError> {
        let url = self.offer_url(kind, offer_id)?;
        let dto: OfferDto = self.fetch_json(self.http.get(url)).await?;
        dto.into_offer(kind)
    }

    async fn list_listings(&self, kind: ListingKind) -> Result<Vec<Listing>, OfferClientError> {
        let url = self.listings_url(kind)?;
        tracing::debug!(%url, "listing ads");
        let dtos: Vec<ListingDto> = self.fetch_json(self.http.get(url)).await?;
        dtos.into_iter().map(|dto| dto.into_listing(kind)).collect()
    }
}

fn offer_status_url(
    base: &Url,
    kind: ListingKind,
    offer_id: OfferId,
) -> Result<Url, url::ParseError> {
    base.join(&format!("{}-offers/{offer_id}/status", kind.name()))
}

#[derive(Debug, Deserialize)]
struct DataWrapper<T> {
    data: T,
}

/// Accepts a bare JSON value or one wrapped in `{"data": ...}`.
fn decode_body<T>(body: &[u8]) -> Result<T, OfferClientError>
where
    T: DeserializeOwned,
{
    match serde_json::from_slice::<T>(body) {
        Ok(value) => Ok(value),
        Err(bare_error) => serde_json::from_slice::<DataWrapper<T>>(body)
            .map(|wrapper| wrapper.data)
            .map_err(|_| OfferClientError::Decode(bare_error.to_string())),
    }
}

#[derive(Debug, Serialize)]
struct StatusUpdateDto {
    status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewOfferDto<'a> {
    sender_id: &'a str,
    receiver_id: &'a str,
    listing_id: &'a str,
    listing_title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    message: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry_date: Option<String>,
}

impl<'a> From<&'a NewOffer> for NewOfferDto<'a> {
    fn from(offer: &'a NewOffer) -> Self {
        Self {
            sender_id: &offer.sender_id,
            receiver_id: &offer.receiver_id,
            listing_id: &offer.listing_id,
            listing_title: &offer.listing_title,
            price: offer.price,
            message: &offer.message,
            status: OfferStatus::Pending.name(),
            expiry_date: offer.expiry_date.and_then(|at| at.format(&Rfc3339).ok()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferDto {
    id: OfferId,
    #[serde(deserialize_with = "string_from_json")]
    sender_id: String,
    #[serde(deserialize_with = "string_from_json")]
    receiver_id: String,
    // Older payloads name the listing after its table and some send both
    // spellings, so each is a field of its own.
    #[serde(default)]
    listing_id: Option<IdValue>,
    #[serde(default)]
    cargo_ad_id: Option<IdValue>,
    #[serde(default)]
    vehicle_ad_id: Option<IdValue>,
    #[serde(default)]
    listing_title: Option<String>,
    #[serde(default)]
    cargo_ad_title: Option<String>,
    #[serde(default)]
    vehicle_ad_title: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    message: Option<String>,
    status: String,
    created_date: String,
    #[serde(default)]
    expiry_date: Option<String>,
}

impl OfferDto {
    fn into_offer(self, kind: ListingKind) -> Result<Offer, OfferClientError> {
        let status = OfferStatus::parse(&self.status).ok_or_else(|| {
            OfferClientError::Decode(format!("unknown offer status '{}'", self.status))
        })?;
        let created_date = parse_timestamp(&self.created_date)?;
        let expiry_date = self
            .expiry_date
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(parse_timestamp)
            .transpose()?;
        let listing_id = self
            .listing_id
            .or(self.cargo_ad_id)
            .or(self.vehicle_ad_id)
            .map(IdValue::into_string)
            .ok_or_else(|| {
                OfferClientError::Decode(format!("offer {} has no listing id", self.id))
            })?;
        let listing_title = self
            .listing_title
            .or(self.cargo_ad_title)
            .or(self.vehicle_ad_title)
            .unwrap_or_default();

        Ok(Offer {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            kind,
            listing_id,
            listing_title,
            price: if kind.is_priced() { self.price } else { None },
            message: self.message.unwrap_or_default(),
            status,
            created_date,
            expiry_date,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingDto {
    #[serde(deserialize_with = "string_from_json")]
    id: String,
    #[serde(default)]
    owner_id: Option<IdValue>,
    #[serde(default)]
    user_id: Option<IdValue>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    origin_city: Option<String>,
    #[serde(default)]
    origin_country: Option<String>,
    #[serde(default)]
    destination_city: Option<String>,
    #[serde(default)]
    destination_country: Option<String>,
    #[serde(default)]
    weight_kg: Option<f64>,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    price: Option<f64>,
    created_date: String,
}

impl ListingDto {
    fn into_listing(self, kind: ListingKind) -> Result<Listing, OfferClientError> {
        let owner_id = self
            .owner_id
            .or(self.user_id)
            .map(IdValue::into_string)
            .ok_or_else(|| {
                OfferClientError::Decode(format!("{kind} listing {} has no owner", self.id))
            })?;
        Ok(Listing {
            created_date: parse_timestamp(&self.created_date)?,
            title: self.title.unwrap_or_else(|| format!("{kind} #{}", self.id)),
            id: self.id,
            kind,
            owner_id,
            origin_city: self.origin_city,
            origin_country: self.origin_country,
            destination_city: self.destination_city,
            destination_country: self.destination_country,
            weight_kg: self.weight_kg.or(self.weight),
            price: self.price,
        })
    }
}

/// An identifier the backend sends either as a string or as a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdValue {
    Text(String),
    Number(i64),
}

impl IdValue {
    fn into_string(self) -> String {
        match self {
            IdValue::Text(text) => text,
            IdValue::Number(number) => number.to_string(),
        }
    }
}

/// RFC 3339, or ISO 8601 without an offset which is taken as UTC.
fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, OfferClientError> {
    let raw = raw.trim();
    OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT).map(|dt| dt.assume_utc()))
        .map_err(|err| OfferClientError::Decode(format!("invalid timestamp '{raw}': {err}")))
}

fn string_from_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct StringOrNumber;

    impl<'de> serde::de::Visitor<'de> for StringOrNumber {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}
