// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// TODO: Re-implement these instead of just aliasing / add to rumqttc adapter

/// Quality of Service
pub type QoS = rumqttc::v5::mqttbytes::QoS;

/// PUBLISH packet
pub type Publish = rumqttc::v5::mqttbytes::v5::Publish;
/// CONNACK packet
pub type ConnAck = rumqttc::v5::mqttbytes::v5::ConnAck;
/// AUTH packet
pub type Auth = rumqttc::v5::mqttbytes::v5::Auth;
/// DISCONNECT packet
pub type Disconnect = rumqttc::v5::mqttbytes::v5::Disconnect;
/// Subscription topic filter entry of a SUBSCRIBE packet
pub type Filter = rumqttc::v5::mqttbytes::v5::Filter;
/// Will message carried in a CONNECT packet
pub type LastWill = rumqttc::v5::mqttbytes::v5::LastWill;

/// Reason code of a CONNACK packet
pub type ConnectReturnCode = rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
/// Reason code of a DISCONNECT packet
pub type DisconnectReasonCode = rumqttc::v5::mqttbytes::v5::DisconnectReasonCode;
/// Reason code of an AUTH packet
pub type AuthReasonCode = rumqttc::v5::mqttbytes::v5::AuthReasonCode;
/// Retained message forwarding rule of a subscription
pub type RetainForwardRule = rumqttc::v5::mqttbytes::v5::RetainForwardRule;

/// Properties for an AUTH packet
pub type AuthProperties = rumqttc::v5::mqttbytes::v5::AuthProperties;
/// Properties for a PUBLISH packet
pub type PublishProperties = rumqttc::v5::mqttbytes::v5::PublishProperties;
/// Properties for a SUBSCRIBE packet
pub type SubscribeProperties = rumqttc::v5::mqttbytes::v5::SubscribeProperties;
/// Properties for an UNSUBSCRIBE packet
pub type UnsubscribeProperties = rumqttc::v5::mqttbytes::v5::UnsubscribeProperties;
/// Properties for a will message
pub type LastWillProperties = rumqttc::v5::mqttbytes::v5::LastWillProperties;
