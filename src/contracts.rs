//! CrossBridge and ERC20 contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the bridge contract.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// CrossBridge contract interface, deployed once on each side of the bridge
    #[sol(rpc)]
    contract CrossBridge {
        /// Payload of attestToken; also the value type of attestedTokens
        struct TokenAttestation {
            address tokenAddress;
            uint256 tokenChain;
            uint8 tokenType;
            uint8 decimals;
            string symbol;
            string name;
            address wrappedTokenAddress;
        }

        /// Transfer details recorded on deposit
        struct TokenTransfer {
            address dstAddress;
            address tokenAddress;
            uint256 srcChain;
            uint256 dstChain;
            uint8 tokenType;
        }

        /// Entry of the supported-token list
        struct TokenInfo {
            address token;
            bool isWrapped;
        }

        // ====================================================================
        // Deposits and bridge-back
        // ====================================================================

        /// Lock tokens on this chain for release on `dstChain`
        function bridgeTokens(address tokenAddress, uint256 amount, uint256 dstChain, address to) external payable;

        /// Burn wrapped tokens on this chain for release of the originals
        function bridgeTokensBack(uint256 amount, address to, bytes32 attestationId, bool convertToNative) external;

        // ====================================================================
        // Relayer calls
        // ====================================================================

        /// Register a wrapped representation of a foreign token
        function attestToken(TokenAttestation attestation) external;

        /// Mark an origin token as deployed on the remote side
        function addDeployedToken(address tokenAddress) external;

        /// Mint / release wrapped tokens for a deposit made on the origin chain
        function releaseWrappedTokens(uint256 amount, address to, bytes32 attestationId) external;

        /// Release locked origin tokens for a bridge-back
        function releaseTokens(uint256 amount, address to, address tokenAddress, bool convertToNative) external;

        // ====================================================================
        // Views
        // ====================================================================

        function getSupportedTokens() external view returns (TokenInfo[] memory);

        function getDeployedToken(address wrappedToken) external view returns (address tokenAddress, uint256 chainId);

        function isWrappedTokenSupported(address tokenAddress, uint256 chainId) external view returns (bool);

        function getWrappedToken(address tokenAddress, uint256 chainId) external view returns (address);

        function tokenTransfers(bytes32 transferId) external view returns (TokenTransfer tokenTransfer, uint256 amount);

        function attestedTokens(bytes32 attestationId) external view returns (
            address tokenAddress,
            uint256 tokenChain,
            uint8 tokenType,
            uint8 decimals,
            string symbol,
            string name,
            address wrappedTokenAddress
        );

        // ====================================================================
        // Events
        // ====================================================================

        event TokensBridged(bytes32 indexed transferId, uint8 tokenType);

        event TokensBridgedBack(uint256 amount, address indexed to, bytes32 indexed attestationId, bool convertToNative);
    }

    /// Minimal ERC20 interface
    #[sol(rpc)]
    contract ERC20 {
        function decimals() external view returns (uint8);
        function symbol() external view returns (string memory);
        function name() external view returns (string memory);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}
