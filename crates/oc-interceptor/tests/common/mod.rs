// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Receiver harness and sink mocks shared by the export tests

pub mod helpers;
pub mod mocks;
