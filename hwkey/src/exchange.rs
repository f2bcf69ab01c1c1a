//! ISO 7816-4 command/response exchange on top of a [`Transport`]
//!
//! Shared by the FIDO, OpenPGP and PIV applets:
//! - commands too long for one short APDU are chained when the link lacks
//!   extended length, or when an extended attempt is answered with `67 00`
//! - `6C xx` is answered by resending with Ne = xx
//! - `61 xx` responses are completed with GET RESPONSE

use bytes::BytesMut;
use hwkey_transport::{CommandApdu, Error as LinkError, ResponseApdu, StatusWord, Transport};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Upper bound on GET RESPONSE continuations for one command
pub const MAX_GET_RESPONSE: usize = 64;

/// Send a command and return its complete response
///
/// Non-success status words are returned, not raised; applets map them to
/// errors with their own tables.
pub fn transmit<T: Transport + ?Sized>(
    transport: &mut T,
    command: &CommandApdu,
    chunk_size: usize,
) -> Result<ResponseApdu> {
    let mut response = send_with_chaining(transport, command, chunk_size)?;

    if let Some(exact) = response.sw().exact_length() {
        debug!(ne = exact, "Resending with the Le requested by the card");
        let resend = command.clone().with_ne(exact as usize);
        response = send_with_chaining(transport, &resend, chunk_size)?;
    }

    read_remaining(transport, response)
}

fn send_with_chaining<T: Transport + ?Sized>(
    transport: &mut T,
    command: &CommandApdu,
    chunk_size: usize,
) -> Result<ResponseApdu> {
    if command.fits_short() {
        return send(transport, command);
    }

    if transport.is_extended_length_supported() {
        let response = send(transport, command)?;
        if response.sw() != StatusWord::WRONG_LENGTH {
            return Ok(response);
        }
        debug!("Extended APDU rejected with 6700, falling back to short form");
    }

    let links = command.chain(chunk_size);
    let total = links.len();
    let mut last = None;
    for (index, link) in links.iter().enumerate() {
        let response = send(transport, link)?;
        if index + 1 < total && !response.is_success() {
            return Err(LinkError::ChainingFailed {
                index,
                total,
                sw: response.sw().to_u16(),
            }
            .into());
        }
        last = Some(response);
    }

    last.ok_or_else(|| Error::protocol("empty command chain"))
}

fn read_remaining<T: Transport + ?Sized>(transport: &mut T, first: ResponseApdu) -> Result<ResponseApdu> {
    let Some(mut available) = first.sw().remaining_bytes() else {
        return Ok(first);
    };

    let mut buffer = BytesMut::from(first.data());
    for _ in 0..MAX_GET_RESPONSE {
        let next = send(transport, &CommandApdu::get_response(available))?;
        buffer.extend_from_slice(next.data());
        match next.sw().remaining_bytes() {
            Some(more) => available = more,
            None => return Ok(ResponseApdu::new(buffer.freeze(), next.sw())),
        }
    }

    Err(Error::protocol("too many GET RESPONSE continuations"))
}

fn send<T: Transport + ?Sized>(transport: &mut T, command: &CommandApdu) -> Result<ResponseApdu> {
    trace!(
        cla = format_args!("{:02x}", command.cla),
        ins = format_args!("{:02x}", command.ins),
        p1 = format_args!("{:02x}", command.p1),
        p2 = format_args!("{:02x}", command.p2),
        data = %hex::encode(command.data()),
        "APDU >>"
    );
    let response = transport.transceive(command)?;
    trace!(sw = %response.sw(), data = %hex::encode(response.data()), "APDU <<");
    Ok(response)
}
