//! USB device selection and transport.

use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::time::Duration;

use rusb::{Device, DeviceHandle, DeviceList, GlobalContext};
use tracing::{debug, error, info, warn};

use crate::controller::{ControlSetup, DeviceIdentity};
use crate::error::Error;

/// Timeout for the lighting control transfer.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(1);

/// Attached USB device.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Candidate {
    /// Position in the full device list.
    pub index: usize,
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Transport used to submit lighting payloads.
pub trait Transport {
    /// Claim every interface of the device.
    fn claim_all(&mut self) -> Result<(), Error>;

    /// Send a payload over the control endpoint, returning the number of bytes written.
    fn control_transfer(&mut self, setup: ControlSetup, payload: &[u8]) -> Result<usize, Error>;

    /// Release all claimed interfaces.
    fn release_all(&mut self) -> Result<(), Error>;

    /// Close the device.
    fn close(self);
}

/// Open keyboard connection.
pub struct Keyboard {
    handle: DeviceHandle<GlobalContext>,
    claimed: Vec<u8>,
}

impl Keyboard {
    /// Open a device and let libusb detach kernel drivers from claimed interfaces.
    pub fn open(device: &Device<GlobalContext>) -> Result<Self, Error> {
        let handle = device.open().map_err(Error::UsbOpen)?;

        match handle.set_auto_detach_kernel_driver(true) {
            Ok(()) => (),
            Err(rusb::Error::NotSupported) => debug!("kernel driver detachment not supported"),
            Err(err) => return Err(Error::UsbOpen(err)),
        }

        debug!(bus = device.bus_number(), address = device.address(), "opened device");

        Ok(Self { handle, claimed: Vec::new() })
    }
}

impl Transport for Keyboard {
    fn claim_all(&mut self) -> Result<(), Error> {
        let device = self.handle.device();
        let descriptor = device.device_descriptor().map_err(Error::UsbDescriptor)?;

        // Composite devices may expose the lighting interface outside the active configuration.
        let configs = (0..descriptor.num_configurations())
            .map(|index| device.config_descriptor(index).map_err(Error::UsbDescriptor))
            .collect::<Result<Vec<_>, Error>>()?;
        let numbers = interface_numbers(
            configs.iter().map(|config| config.interfaces().map(|interface| interface.number())),
        );

        for number in numbers {
            if self.claimed.contains(&number) {
                continue;
            }

            self.handle
                .claim_interface(number)
                .map_err(|source| Error::UsbInterface { interface: number, source })?;
            self.claimed.push(number);

            debug!(interface = number, "claimed interface");
        }

        Ok(())
    }

    fn control_transfer(&mut self, setup: ControlSetup, payload: &[u8]) -> Result<usize, Error> {
        self.handle
            .write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                payload,
                TRANSFER_TIMEOUT,
            )
            .map_err(Error::UsbTransfer)
    }

    fn release_all(&mut self) -> Result<(), Error> {
        let mut result = Ok(());

        for number in self.claimed.drain(..) {
            match self.handle.release_interface(number) {
                Ok(()) => debug!(interface = number, "released interface"),
                Err(source) if result.is_ok() => {
                    result = Err(Error::UsbInterface { interface: number, source });
                },
                Err(source) => warn!(interface = number, "unable to release interface: {}", source),
            }
        }

        result
    }

    fn close(self) {
        debug!("closing device");
    }
}

/// Interface numbers of all configurations, in first-seen order without duplicates.
fn interface_numbers<C, I>(configs: C) -> Vec<u8>
where
    C: IntoIterator<Item = I>,
    I: IntoIterator<Item = u8>,
{
    let mut numbers = Vec::new();
    for number in configs.into_iter().flatten() {
        if !numbers.contains(&number) {
            numbers.push(number);
        }
    }
    numbers
}

impl Drop for Keyboard {
    fn drop(&mut self) {
        // Best-effort cleanup for interfaces left claimed by an early return.
        for number in self.claimed.drain(..) {
            let _ = self.handle.release_interface(number);
        }
    }
}

/// List all attached USB devices.
pub fn enumerate() -> Result<(DeviceList<GlobalContext>, Vec<Candidate>), Error> {
    let devices = rusb::devices().map_err(Error::UsbEnumeration)?;

    let candidates = devices
        .iter()
        .enumerate()
        .map(|(index, device)| {
            let descriptor = device.device_descriptor().map_err(Error::UsbDescriptor)?;
            Ok(Candidate {
                index,
                bus: device.bus_number(),
                address: device.address(),
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    debug!(count = candidates.len(), "enumerated USB devices");

    Ok((devices, candidates))
}

/// Pick the device matching `identity`, asking the user if there is more than one.
///
/// Returns the index of the device within `candidates`.
pub fn choose<R, W>(
    candidates: &[Candidate],
    identity: DeviceIdentity,
    input: &mut R,
    output: &mut W,
) -> Result<usize, Error>
where
    R: BufRead,
    W: Write,
{
    let matching: Vec<&Candidate> = candidates
        .iter()
        .filter(|candidate| identity.matches(candidate.vendor_id, candidate.product_id))
        .collect();

    match matching.as_slice() {
        [] => return Err(Error::NoDeviceFound { identity }),
        [candidate] => return Ok(candidate.index),
        _ => (),
    }

    writeln!(output, "More than one matching device found. Please choose the desired device...")?;
    for candidate in &matching {
        let Candidate { index, bus, address, .. } = candidate;
        writeln!(output, "[{}] Bus: {}, Device: {}", index, bus, address)?;
    }

    let index = loop {
        write!(output, "Please enter device index: ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no device index given").into());
        }

        // Query again if the input does not start with a digit.
        let line = line.trim();
        match usize::from_str(line) {
            Ok(index) if line.starts_with(|c: char| c.is_ascii_digit()) => break index,
            _ => writeln!(output)?,
        }
    };

    if !matching.iter().any(|candidate| candidate.index == index) {
        return Err(Error::InvalidSelection { index, max: candidates.len() - 1 });
    }

    Ok(index)
}

/// Find and open the keyboard.
pub fn select(identity: DeviceIdentity) -> Result<Keyboard, Error> {
    let (devices, candidates) = enumerate()?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let index = choose(&candidates, identity, &mut stdin.lock(), &mut stdout.lock())?;

    let device = devices
        .iter()
        .nth(index)
        .ok_or(Error::InvalidSelection { index, max: candidates.len() - 1 })?;

    info!(bus = device.bus_number(), address = device.address(), "using device {}", identity);

    Keyboard::open(&device)
}

/// Submit a payload, always releasing and closing the device afterwards.
///
/// Failing to write the payload is logged but not returned, since the device is still usable.
pub fn apply<T: Transport>(
    mut transport: T,
    setup: ControlSetup,
    payload: &[u8],
) -> Result<(), Error> {
    if let Err(err) = transport.claim_all() {
        let _ = transport.release_all();
        transport.close();
        return Err(err);
    }

    match transport.control_transfer(setup, payload) {
        Ok(written) => info!(written, "lighting applied"),
        Err(err) => error!("{}", err),
    }

    let released = transport.release_all();
    transport.close();

    released
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const IDENTITY: DeviceIdentity = DeviceIdentity::new(0x046a, 0x0079);

    const SETUP: ControlSetup =
        ControlSetup { request_type: 0x21, request: 0x09, value: 0x0204, index: 0x0001 };

    fn candidate(index: usize, vendor_id: u16, product_id: u16) -> Candidate {
        Candidate { index, bus: 1, address: index as u8 + 2, vendor_id, product_id }
    }

    /// Mixed device list with keyboards at index 1 and 3.
    fn two_keyboards() -> Vec<Candidate> {
        vec![
            candidate(0, 0x1d6b, 0x0002),
            candidate(1, 0x046a, 0x0079),
            candidate(2, 0x046d, 0xc52b),
            candidate(3, 0x046a, 0x0079),
        ]
    }

    fn choose_with(candidates: &[Candidate], input: &str) -> (Result<usize, Error>, String) {
        let mut input = Cursor::new(input.as_bytes());
        let mut output = Vec::new();
        let result = choose(candidates, IDENTITY, &mut input, &mut output);
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn no_match_is_not_found() {
        let candidates = vec![candidate(0, 0x1d6b, 0x0002), candidate(1, 0x046a, 0x0080)];
        match choose_with(&candidates, "").0 {
            Err(Error::NoDeviceFound { identity }) => assert_eq!(identity, IDENTITY),
            other => panic!("expected no device, got {:?}", other),
        }
    }

    #[test]
    fn empty_bus_is_not_found() {
        assert!(matches!(choose_with(&[], "").0, Err(Error::NoDeviceFound { .. })));
    }

    #[test]
    fn single_match_is_selected_without_prompt() {
        let candidates = vec![candidate(0, 0x1d6b, 0x0002), candidate(1, 0x046a, 0x0079)];
        let (result, output) = choose_with(&candidates, "");
        assert_eq!(result.unwrap(), 1);
        assert!(output.is_empty());
    }

    #[test]
    fn override_identity_is_used() {
        let candidates = vec![candidate(0, 0x1d6b, 0x0002), candidate(1, 0x046a, 0x0079)];
        let mut input = Cursor::new(&b""[..]);
        let mut output = Vec::new();
        let identity = DeviceIdentity::new(0x1d6b, 0x0002);
        assert_eq!(choose(&candidates, identity, &mut input, &mut output).unwrap(), 0);
    }

    #[test]
    fn multiple_matches_prompt_for_index() {
        let (result, output) = choose_with(&two_keyboards(), "3\n");
        assert_eq!(result.unwrap(), 3);
        assert!(output.starts_with("More than one matching device found."));
        assert!(output.contains("[1] Bus: 1, Device: 3\n"));
        assert!(output.contains("[3] Bus: 1, Device: 5\n"));
        assert!(!output.contains("[0]"));
        assert!(!output.contains("[2]"));
        assert!(output.ends_with("Please enter device index: "));
    }

    #[test]
    fn non_numeric_input_prompts_again() {
        let (result, output) = choose_with(&two_keyboards(), "\nabc\n  \n 1 \n");
        assert_eq!(result.unwrap(), 1);
        assert_eq!(output.matches("Please enter device index: ").count(), 4);
    }

    #[test]
    fn signed_index_prompts_again() {
        let (result, output) = choose_with(&two_keyboards(), "+1\n3\n");
        assert_eq!(result.unwrap(), 3);
        assert_eq!(output.matches("Please enter device index: ").count(), 2);
    }

    #[test]
    fn interfaces_of_every_configuration() {
        let configs = vec![vec![0, 1], vec![0, 2]];
        assert_eq!(interface_numbers(configs), vec![0, 1, 2]);
    }

    #[test]
    fn interfaces_keep_descriptor_order() {
        let configs = vec![vec![3, 1, 3], vec![], vec![1, 0]];
        assert_eq!(interface_numbers(configs), vec![3, 1, 0]);
        assert!(interface_numbers(Vec::<Vec<u8>>::new()).is_empty());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        match choose_with(&two_keyboards(), "4\n").0 {
            Err(Error::InvalidSelection { index, max }) => {
                assert_eq!(index, 4);
                assert_eq!(max, 3);
            },
            other => panic!("expected invalid selection, got {:?}", other),
        }
    }

    #[test]
    fn unlisted_index_is_rejected() {
        assert!(matches!(
            choose_with(&two_keyboards(), "2\n").0,
            Err(Error::InvalidSelection { index: 2, max: 3 })
        ));
    }

    #[test]
    fn closed_input_fails() {
        assert!(matches!(choose_with(&two_keyboards(), "abc\n").0, Err(Error::SelectionInput(_))));
    }

    #[derive(PartialEq, Eq, Debug, Copy, Clone)]
    enum Call {
        Claim,
        Transfer,
        Release,
        Close,
    }

    #[derive(Default)]
    struct MockTransport<'a> {
        calls: Option<&'a mut Vec<Call>>,
        fail_claim: bool,
        fail_transfer: bool,
        fail_release: bool,
    }

    impl MockTransport<'_> {
        fn record(&mut self, call: Call) {
            if let Some(calls) = self.calls.as_mut() {
                calls.push(call);
            }
        }
    }

    impl Transport for MockTransport<'_> {
        fn claim_all(&mut self) -> Result<(), Error> {
            self.record(Call::Claim);
            if self.fail_claim {
                return Err(Error::UsbInterface { interface: 0, source: rusb::Error::Busy });
            }
            Ok(())
        }

        fn control_transfer(&mut self, setup: ControlSetup, payload: &[u8]) -> Result<usize, Error> {
            self.record(Call::Transfer);
            assert_eq!(setup, SETUP);
            assert_eq!(payload.len(), 64);
            if self.fail_transfer {
                return Err(Error::UsbTransfer(rusb::Error::Pipe));
            }
            Ok(payload.len())
        }

        fn release_all(&mut self) -> Result<(), Error> {
            self.record(Call::Release);
            if self.fail_release {
                return Err(Error::UsbInterface { interface: 1, source: rusb::Error::NoDevice });
            }
            Ok(())
        }

        fn close(mut self) {
            self.record(Call::Close);
        }
    }

    #[test]
    fn transport_order() {
        let mut calls = Vec::new();
        let transport = MockTransport { calls: Some(&mut calls), ..Default::default() };

        apply(transport, SETUP, &[0x04; 64]).unwrap();

        assert_eq!(calls, vec![Call::Claim, Call::Transfer, Call::Release, Call::Close]);
    }

    #[test]
    fn transfer_failure_still_releases() {
        let mut calls = Vec::new();
        let transport =
            MockTransport { calls: Some(&mut calls), fail_transfer: true, ..Default::default() };

        assert!(apply(transport, SETUP, &[0x04; 64]).is_ok());

        assert_eq!(calls, vec![Call::Claim, Call::Transfer, Call::Release, Call::Close]);
    }

    #[test]
    fn claim_failure_skips_transfer() {
        let mut calls = Vec::new();
        let transport =
            MockTransport { calls: Some(&mut calls), fail_claim: true, ..Default::default() };

        let result = apply(transport, SETUP, &[0x04; 64]);

        assert!(matches!(result, Err(Error::UsbInterface { interface: 0, .. })));
        assert_eq!(calls, vec![Call::Claim, Call::Release, Call::Close]);
    }

    #[test]
    fn release_failure_is_returned_after_close() {
        let mut calls = Vec::new();
        let transport =
            MockTransport { calls: Some(&mut calls), fail_release: true, ..Default::default() };

        let result = apply(transport, SETUP, &[0x04; 64]);

        assert!(matches!(result, Err(Error::UsbInterface { interface: 1, .. })));
        assert_eq!(calls, vec![Call::Claim, Call::Transfer, Call::Release, Call::Close]);
    }
}
